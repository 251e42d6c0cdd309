// ─────────────────────────────────────────────────────────────────────
// XAL Online Model — Lattice
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Element sequences and their linearization into a run-ready lattice.
//!
//! A [`Sequence`] is a tree: every node sits at a position relative to its
//! parent. [`Lattice::from_sequence`] flattens it in ascending absolute
//! position and fills uncovered stretches with implicit drifts.

use serde::{Deserialize, Serialize};
use xal_types::error::{ModelError, ModelResult};

use crate::element::Element;

/// Positions closer than this are considered coincident (m).
const POSITION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LatticeNode {
    Element { element: Element, position: f64 },
    Sequence(Sequence),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    id: String,
    position: f64,
    children: Vec<LatticeNode>,
}

/// Traversal callbacks. Positions passed in are absolute.
pub trait LatticeVisitor {
    fn visit_element(&mut self, element: &Element, position: f64);

    fn enter_sequence(&mut self, _sequence: &Sequence, _position: f64) {}

    fn exit_sequence(&mut self, _sequence: &Sequence, _position: f64) {}
}

impl Sequence {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            position: 0.0,
            children: Vec::new(),
        }
    }

    /// Place this sequence at `position` within its eventual parent.
    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Add `element` with its entrance at `position` relative to this sequence.
    pub fn add_element(&mut self, element: Element, position: f64) -> &mut Self {
        self.children.push(LatticeNode::Element { element, position });
        self
    }

    pub fn add_sequence(&mut self, sequence: Sequence) -> &mut Self {
        self.children.push(LatticeNode::Sequence(sequence));
        self
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, index: usize) -> Option<&LatticeNode> {
        self.children.get(index)
    }

    pub fn children(&self) -> &[LatticeNode] {
        &self.children
    }

    /// Number of elements in the whole subtree.
    pub fn leaf_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| match c {
                LatticeNode::Element { .. } => 1,
                LatticeNode::Sequence(s) => s.leaf_count(),
            })
            .sum()
    }

    /// Extent from this sequence's origin to the exit of its last element.
    pub fn length(&self) -> f64 {
        self.children
            .iter()
            .map(|c| match c {
                LatticeNode::Element { element, position } => position + element.length(),
                LatticeNode::Sequence(s) => s.position + s.length(),
            })
            .fold(0.0, f64::max)
    }

    /// Append `other`'s children after the current end of this sequence.
    pub fn concatenate(&mut self, other: Sequence) {
        let offset = self.length();
        for child in other.children {
            let shifted = match child {
                LatticeNode::Element { element, position } => LatticeNode::Element {
                    element,
                    position: position + offset,
                },
                LatticeNode::Sequence(mut s) => {
                    s.position += offset;
                    LatticeNode::Sequence(s)
                }
            };
            self.children.push(shifted);
        }
    }

    /// Depth-first traversal in insertion order.
    pub fn accept<V: LatticeVisitor>(&self, visitor: &mut V) {
        self.walk(visitor, self.position);
    }

    fn walk<V: LatticeVisitor>(&self, visitor: &mut V, origin: f64) {
        visitor.enter_sequence(self, origin);
        for child in &self.children {
            match child {
                LatticeNode::Element { element, position } => {
                    visitor.visit_element(element, origin + position)
                }
                LatticeNode::Sequence(s) => s.walk(visitor, origin + s.position),
            }
        }
        visitor.exit_sequence(self, origin);
    }

    /// Flattened elements with absolute entrance positions, in traversal order.
    pub fn elements(&self) -> Vec<PlacedElement> {
        let mut collector = Collector::default();
        self.accept(&mut collector);
        collector.placed
    }
}

#[derive(Default)]
struct Collector {
    placed: Vec<PlacedElement>,
}

impl LatticeVisitor for Collector {
    fn visit_element(&mut self, element: &Element, position: f64) {
        self.placed.push(PlacedElement {
            element: element.clone(),
            position,
        });
    }
}

/// Element at an absolute entrance position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedElement {
    pub element: Element,
    pub position: f64,
}

impl PlacedElement {
    pub fn exit(&self) -> f64 {
        self.position + self.element.length()
    }
}

/// Linear, position-ordered element list a tracker walks through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    id: String,
    elements: Vec<PlacedElement>,
}

impl Lattice {
    /// Sort the sequence's elements by absolute position and fill gaps
    /// with drifts named `"<next id>:drift"`, including the stretch from
    /// the sequence origin to the first element. Overlapping thick
    /// elements, or elements placed before the origin, are a
    /// configuration error.
    pub fn from_sequence(root: &Sequence) -> ModelResult<Self> {
        let mut placed = root.elements();
        for p in &placed {
            p.element.validate()?;
            if !p.position.is_finite() {
                return Err(ModelError::Config(format!(
                    "element '{}' has non-finite position",
                    p.element.id()
                )));
            }
        }
        placed.sort_by(|a, b| a.position.total_cmp(&b.position));

        let mut elements: Vec<PlacedElement> = Vec::with_capacity(placed.len());
        let (mut end, mut prev_id) = (root.position(), root.id().to_string());
        for p in placed {
            if p.position < end - POSITION_TOLERANCE {
                return Err(ModelError::Config(format!(
                    "element '{}' at {} overlaps '{}' ending at {}",
                    p.element.id(),
                    p.position,
                    prev_id,
                    end
                )));
            }
            if p.position > end + POSITION_TOLERANCE {
                let id = format!("{}:drift", p.element.id());
                elements.push(PlacedElement {
                    element: Element::drift(&id, p.position - end),
                    position: end,
                });
            }
            end = p.exit();
            prev_id = p.element.id().to_string();
            elements.push(p);
        }

        Ok(Self {
            id: root.id().to_string(),
            elements,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elements(&self) -> &[PlacedElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|p| p.element.id() == id)
    }

    pub fn element_by_id(&self, id: &str) -> Option<&PlacedElement> {
        self.elements.iter().find(|p| p.element.id() == id)
    }

    pub fn start(&self) -> f64 {
        self.elements.first().map_or(0.0, |p| p.position)
    }

    pub fn length(&self) -> f64 {
        self.elements.last().map_or(0.0, |p| p.exit()) - self.start()
    }
}

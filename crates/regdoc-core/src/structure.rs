//! Chapter tree stored as an arena.
//!
//! Nodes reference each other only through [`NodeId`] indices into the
//! arena, so the tree can be serialized as-is and never forms ownership
//! cycles.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegDocError;

/// Index of a [`ChapterNode`] inside its [`DocumentStructure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// One chapter, section or clause of a regulation.
///
/// # Examples
///
/// ```
/// use regdoc_core::{ChapterNode, NodeId};
///
/// let node = ChapterNode {
///     id: NodeId(0),
///     section_number: "2.1".into(),
///     title: "Scope".into(),
///     level: 2,
///     page_num: 4,
///     parent_id: None,
///     children_ids: Vec::new(),
/// };
/// assert_eq!(node.label(), "2.1 Scope");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterNode {
    pub id: NodeId,
    /// Dotted number ("2.1.4") or textual marker ("Chapter 3").
    pub section_number: String,
    pub title: String,
    /// 1-based depth.
    pub level: u32,
    /// Page of first appearance.
    pub page_num: u32,
    pub parent_id: Option<NodeId>,
    pub children_ids: Vec<NodeId>,
}

impl ChapterNode {
    /// Section number and title joined for display and path materialization.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            self.section_number.clone()
        } else {
            format!("{} {}", self.section_number, self.title)
        }
    }
}

/// A node of the table of contents returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    pub node_id: NodeId,
    pub section_number: String,
    pub title: String,
    pub level: u32,
    pub page_start: u32,
    pub page_end: u32,
    pub children: Vec<TocEntry>,
}

/// Arena of chapter nodes plus the ordered list of roots.
///
/// # Examples
///
/// ```
/// use regdoc_core::DocumentStructure;
///
/// let mut tree = DocumentStructure::new();
/// let general = tree.add_node("1", "General", 1, 1, None).unwrap();
/// let scope = tree.add_node("1.1", "Scope", 2, 1, Some(general)).unwrap();
///
/// assert_eq!(tree.ancestors(scope), vec![general, scope]);
/// assert_eq!(tree.find_by_section_number("1.1").unwrap().id, scope);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStructure {
    nodes: Vec<ChapterNode>,
    root_node_ids: Vec<NodeId>,
}

impl DocumentStructure {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, linking it under `parent` or as a new root.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Parse`] if `parent` does not exist or its
    /// level is not strictly lower than `level`.
    pub fn add_node(
        &mut self,
        section_number: &str,
        title: &str,
        level: u32,
        page_num: u32,
        parent: Option<NodeId>,
    ) -> Result<NodeId, RegDocError> {
        let id = NodeId(self.nodes.len() as u32);

        match parent {
            Some(parent_id) => {
                let parent_node = self.nodes.get_mut(parent_id.0 as usize).ok_or_else(|| {
                    RegDocError::Parse(format!("parent {parent_id} does not exist"))
                })?;
                if parent_node.level >= level {
                    return Err(RegDocError::Parse(format!(
                        "chapter {section_number} (level {level}) cannot nest under {} (level {})",
                        parent_node.section_number, parent_node.level
                    )));
                }
                parent_node.children_ids.push(id);
            }
            None => self.root_node_ids.push(id),
        }

        self.nodes.push(ChapterNode {
            id,
            section_number: section_number.to_string(),
            title: title.to_string(),
            level,
            page_num,
            parent_id: parent,
            children_ids: Vec::new(),
        });

        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&ChapterNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[ChapterNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.root_node_ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look a chapter up by its section number.
    ///
    /// Numbers that restart per chapter (`第一节`, `Section 1`) occur more
    /// than once; a bare number finds the first in document order, while a
    /// qualified path such as `第二章 > 第一节` names one exactly.
    ///
    /// # Examples
    ///
    /// ```
    /// use regdoc_core::DocumentStructure;
    ///
    /// let mut tree = DocumentStructure::new();
    /// let one = tree.add_node("第一章", "总则", 1, 1, None).unwrap();
    /// tree.add_node("第一节", "一般规定", 2, 1, Some(one)).unwrap();
    /// let two = tree.add_node("第二章", "设备", 1, 2, None).unwrap();
    /// let later = tree.add_node("第一节", "充电装置", 2, 2, Some(two)).unwrap();
    ///
    /// assert_eq!(tree.find_by_section_number("第一节").unwrap().page_num, 1);
    /// assert_eq!(tree.find_by_section_number("第二章 > 第一节").unwrap().id, later);
    /// ```
    pub fn find_by_section_number(&self, section_number: &str) -> Option<&ChapterNode> {
        let wanted = section_number.trim();
        if wanted.contains('>') {
            let mut parent = None;
            let mut found = None;
            for part in wanted.split('>') {
                let node = self.find_in_scope(parent, part.trim())?;
                parent = Some(node.id);
                found = Some(node);
            }
            return found;
        }
        self.nodes.iter().find(|n| n.section_number == wanted)
    }

    /// The child of `parent` (a root when `None`) numbered `section_number`.
    pub fn find_in_scope(
        &self,
        parent: Option<NodeId>,
        section_number: &str,
    ) -> Option<&ChapterNode> {
        let siblings = match parent {
            Some(id) => &self.get(id)?.children_ids,
            None => &self.root_node_ids,
        };
        siblings
            .iter()
            .filter_map(|id| self.get(*id))
            .find(|n| n.section_number == section_number)
    }

    /// Ancestor chain from the root down to and including `id`.
    ///
    /// Unknown ids yield an empty chain.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id).map(|n| n.id);
        while let Some(current) = cursor {
            chain.push(current);
            cursor = self.get(current).and_then(|n| n.parent_id);
        }
        chain.reverse();
        chain
    }

    /// Labels of the ancestor chain, root first.
    pub fn path_labels(&self, id: NodeId) -> Vec<String> {
        self.ancestors(id)
            .into_iter()
            .filter_map(|a| self.get(a).map(ChapterNode::label))
            .collect()
    }

    /// All node ids in document (pre-)order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.root_node_ids {
            self.collect_subtree(*root, &mut out);
        }
        out
    }

    /// `id` followed by all its descendants in pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.get(id).is_some() {
            self.collect_subtree(id, &mut out);
        }
        out
    }

    fn collect_subtree(&self, id: NodeId, out: &mut Vec<NodeId>) {
        // Iterative so that pathological nesting cannot overflow the stack.
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.get(current) {
                stack.extend(node.children_ids.iter().rev().copied());
            }
        }
    }

    /// Page span of every chapter.
    ///
    /// A chapter runs from its first page to the page where the next
    /// chapter outside its subtree begins, or to `last_page` when no such
    /// chapter follows.
    pub fn page_ranges(&self, last_page: u32) -> HashMap<NodeId, (u32, u32)> {
        let order = self.preorder();
        let mut ranges = HashMap::with_capacity(order.len());

        for (index, id) in order.iter().enumerate() {
            let Some(node) = self.get(*id) else {
                continue;
            };
            let subtree_len = self.subtree(*id).len();
            let end = match order.get(index + subtree_len).and_then(|next| self.get(*next)) {
                Some(next) => next.page_num.max(node.page_num),
                None => last_page.max(node.page_num),
            };
            ranges.insert(*id, (node.page_num, end));
        }

        ranges
    }

    /// Nested table of contents with page ranges.
    pub fn toc(&self, last_page: u32) -> Vec<TocEntry> {
        let ranges = self.page_ranges(last_page);
        self.root_node_ids
            .iter()
            .filter_map(|root| self.toc_entry(*root, &ranges))
            .collect()
    }

    fn toc_entry(&self, id: NodeId, ranges: &HashMap<NodeId, (u32, u32)>) -> Option<TocEntry> {
        let node = self.get(id)?;
        let (page_start, page_end) = ranges
            .get(&id)
            .copied()
            .unwrap_or((node.page_num, node.page_num));
        Some(TocEntry {
            node_id: id,
            section_number: node.section_number.clone(),
            title: node.title.clone(),
            level: node.level,
            page_start,
            page_end,
            children: node
                .children_ids
                .iter()
                .filter_map(|child| self.toc_entry(*child, ranges))
                .collect(),
        })
    }

    /// Parent/child relationships keyed by section number.
    ///
    /// Two trees built from the same input compare equal under this view
    /// even if their node ids differ.
    pub fn shape(&self) -> Vec<(Option<String>, String, u32)> {
        self.preorder()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|n| {
                let parent = n
                    .parent_id
                    .and_then(|p| self.get(p))
                    .map(|p| p.section_number.clone());
                (parent, n.section_number.clone(), n.level)
            })
            .collect()
    }
}

//! Publication threads and engagement ranking.
//!
//! A thread is an n-ary tree rooted at an original post. Comments are only
//! ever appended as children, so a thread can never contain a cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{ProfileId, PubId};

/// Number of ranked children returned when no width is configured.
pub const DEFAULT_RANKING_WIDTH: usize = 3;

/// `(profile_id, pub_id)` pair identifying a publication.
pub type PubKey = (ProfileId, PubId);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("no node with index {index}")]
    NodeNotFound { index: PubId },
    #[error("publication {profile_id}/{pub_id} not found")]
    PublicationNotFound { profile_id: ProfileId, pub_id: PubId },
    #[error("publication {profile_id}/{pub_id} already ingested")]
    DuplicatePublication { profile_id: ProfileId, pub_id: PubId },
    #[error("publication {profile_id}/{pub_id} does not point at a parent")]
    NotAComment { profile_id: ProfileId, pub_id: PubId },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicationRef {
    pub profile_id: ProfileId,
    pub profile_id_pointed: ProfileId,
    pub pub_id_pointed: PubId,
}

impl PublicationRef {
    pub fn post(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            profile_id_pointed: 0,
            pub_id_pointed: 0,
        }
    }

    pub fn comment(
        profile_id: ProfileId,
        profile_id_pointed: ProfileId,
        pub_id_pointed: PubId,
    ) -> Self {
        Self {
            profile_id,
            profile_id_pointed,
            pub_id_pointed,
        }
    }

    pub fn pointed(&self) -> Option<PubKey> {
        if self.profile_id_pointed == 0 && self.pub_id_pointed == 0 {
            None
        } else {
            Some((self.profile_id_pointed, self.pub_id_pointed))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicationNode {
    pub index: PubId,
    pub value: PublicationRef,
    children: Vec<PublicationNode>,
}

impl PublicationNode {
    pub fn new(index: PubId, value: PublicationRef) -> Self {
        Self {
            index,
            value,
            children: Vec::new(),
        }
    }

    pub fn key(&self) -> PubKey {
        (self.value.profile_id, self.index)
    }

    pub fn children(&self) -> &[PublicationNode] {
        &self.children
    }

    pub fn add_child(&mut self, child: PublicationNode) {
        self.children.push(child);
    }

    /// Pre-order walk over this node and everything below it.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder { stack: vec![self] }
    }

    /// Number of nodes in this subtree, this node included.
    pub fn size(&self) -> usize {
        self.preorder().count()
    }

    /// Sums the immediate child count of every node in this subtree whose
    /// index equals `target`. The same index may sit at several positions
    /// and every one of them contributes.
    pub fn count_descendants_with_index(&self, target: PubId) -> u64 {
        self.preorder()
            .filter(|node| node.index == target)
            .map(|node| node.children.len() as u64)
            .sum()
    }

    fn find_mut<F>(&mut self, pred: F) -> Option<&mut PublicationNode>
    where
        F: Fn(&PublicationNode) -> bool,
    {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if pred(&*node) {
                return Some(node);
            }
            stack.extend(node.children.iter_mut().rev());
        }
        None
    }
}

pub struct Preorder<'a> {
    stack: Vec<&'a PublicationNode>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a PublicationNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicationTree {
    root: PublicationNode,
    len: usize,
}

impl PublicationTree {
    pub fn new(root: PublicationNode) -> Self {
        let len = root.size();
        Self { root, len }
    }

    pub fn root(&self) -> &PublicationNode {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn find(&self, profile_id: ProfileId, pub_id: PubId) -> Option<&PublicationNode> {
        self.root
            .preorder()
            .find(|node| node.key() == (profile_id, pub_id))
    }

    /// Appends `node` as the last child of the first node, in pre-order,
    /// whose index is `parent_index`.
    pub fn insert(&mut self, parent_index: PubId, node: PublicationNode) -> Result<(), TreeError> {
        let added = node.size();
        let parent = self
            .root
            .find_mut(|candidate| candidate.index == parent_index)
            .ok_or(TreeError::NodeNotFound {
                index: parent_index,
            })?;
        parent.add_child(node);
        self.len += added;
        Ok(())
    }

    /// Appends `node` under the publication it points at, matching on the
    /// full `(profile_id, index)` pair.
    pub fn attach(&mut self, node: PublicationNode) -> Result<(), TreeError> {
        let (profile_id, pub_id) = node.value.pointed().ok_or(TreeError::NotAComment {
            profile_id: node.value.profile_id,
            pub_id: node.index,
        })?;
        let added = node.size();
        let parent = self
            .root
            .find_mut(|candidate| candidate.key() == (profile_id, pub_id))
            .ok_or(TreeError::PublicationNotFound { profile_id, pub_id })?;
        debug!(
            parent_profile = profile_id,
            parent_pub = pub_id,
            child_profile = node.value.profile_id,
            child_pub = node.index,
            "attached publication"
        );
        parent.add_child(node);
        self.len += added;
        Ok(())
    }

    pub fn count_descendants_with_index(&self, target: PubId) -> u64 {
        self.root.count_descendants_with_index(target)
    }

    /// Ranks the direct children of every node indexed `target` by their own
    /// engagement score and keeps the best `k`. Equal scores keep insertion
    /// order.
    pub fn top_children_by_engagement(
        &self,
        target: PubId,
        k: usize,
    ) -> Vec<(&PublicationNode, u64)> {
        let mut ranked: Vec<(&PublicationNode, u64)> = self
            .root
            .preorder()
            .filter(|node| node.index == target)
            .flat_map(|node| node.children.iter())
            .map(|child| (child, child.count_descendants_with_index(child.index)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(k);
        ranked
    }
}

/// Feed entry announcing a new post or comment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicationEvent {
    pub pub_id: PubId,
    pub profile_id: ProfileId,
    pub profile_id_pointed: ProfileId,
    pub pub_id_pointed: PubId,
}

impl PublicationEvent {
    pub fn into_node(self) -> PublicationNode {
        PublicationNode::new(
            self.pub_id,
            PublicationRef::comment(self.profile_id, self.profile_id_pointed, self.pub_id_pointed),
        )
    }
}

/// One tree per root post, plus the thread every known publication lives in.
#[derive(Clone, Debug, Default)]
pub struct ThreadRegistry {
    threads: BTreeMap<PubKey, PublicationTree>,
    membership: BTreeMap<PubKey, PubKey>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, profile_id: ProfileId, pub_id: PubId) -> bool {
        self.membership.contains_key(&(profile_id, pub_id))
    }

    pub fn thread(&self, root: PubKey) -> Option<&PublicationTree> {
        self.threads.get(&root)
    }

    /// Root key of the thread holding `profile_id/pub_id`.
    pub fn thread_of(&self, profile_id: ProfileId, pub_id: PubId) -> Option<PubKey> {
        self.membership.get(&(profile_id, pub_id)).copied()
    }

    /// Opens a new thread for an unpointed publication, or attaches a comment
    /// to the thread of the publication it points at. Returns the thread's
    /// root key.
    pub fn ingest(&mut self, event: PublicationEvent) -> Result<PubKey, TreeError> {
        let key = (event.profile_id, event.pub_id);
        if self.membership.contains_key(&key) {
            return Err(TreeError::DuplicatePublication {
                profile_id: key.0,
                pub_id: key.1,
            });
        }
        let node = event.into_node();
        let root = match node.value.pointed() {
            None => {
                self.threads.insert(key, PublicationTree::new(node));
                key
            }
            Some((profile_id, pub_id)) => {
                let root = self
                    .thread_of(profile_id, pub_id)
                    .ok_or(TreeError::PublicationNotFound { profile_id, pub_id })?;
                let tree = self
                    .threads
                    .get_mut(&root)
                    .ok_or(TreeError::PublicationNotFound {
                        profile_id: root.0,
                        pub_id: root.1,
                    })?;
                tree.attach(node)?;
                root
            }
        };
        self.membership.insert(key, root);
        Ok(root)
    }
}

//! Configuration trees held by the simulated device.

use ncli_core::document::Node;

/// Merges `patch` into `target` by element name. Leaves take the patch
/// value; containers merge recursively; unknown elements are appended.
pub fn merge(target: &mut Node, patch: &Node) {
    if patch.children.is_empty() {
        target.value = patch.value.clone();
        return;
    }
    target.value = None;
    for child in &patch.children {
        match target.child_mut(&child.name) {
            Some(existing) => merge(existing, child),
            None => target.push(child.clone()),
        }
    }
}

/// Contents of a datastore wrapped in the element a reply carries.
pub fn wrapped(name: &str, content: &Node) -> Node {
    let mut node = Node::new(name);
    node.children = content.children.clone();
    node
}

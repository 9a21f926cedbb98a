use parley_core::flow::Flow;

/// Target of the outgoing edge taken from `source`.
///
/// With a selector, only an edge carrying that exact branch selector
/// matches; without one, the first outgoing edge in declared order wins.
/// `None` means the run has nowhere left to go.
pub fn next_node(flow: &Flow, source: &str, selector: Option<&str>) -> Option<String> {
    let mut outgoing = flow.outgoing(source);
    let edge = match selector {
        Some(sel) => outgoing.find(|e| e.selector() == Some(sel)),
        None => outgoing.next(),
    };
    edge.map(|e| e.target.clone())
}

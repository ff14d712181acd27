//! Conversation reconstruction from reply and reference headers

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Message, MessageId, Thread, ThreadId};

/// Group messages into conversation threads
///
/// Pure and deterministic: the same input always yields the same threads,
/// and running it again over the messages of its own output reproduces the
/// same grouping. Malformed or missing headers never fail the batch; a
/// message with no usable linkage becomes a single-message thread, and a
/// message without an id is left out entirely.
///
/// Threads are ordered by latest message date, newest first; undated
/// threads come last.
pub fn build_threads(messages: &[Message]) -> Vec<Thread> {
    let index = index_by_id(messages);

    // Parents in input order so the grouping is deterministic
    let mut parent_of: HashMap<&MessageId, &MessageId> = HashMap::new();
    let mut children_of: HashMap<&MessageId, Vec<&MessageId>> = HashMap::new();
    let mut order: Vec<&MessageId> = Vec::new();
    let mut seen_ids: HashSet<&MessageId> = HashSet::new();

    for message in messages {
        let Some(id) = message.resolvable_id() else {
            continue;
        };
        // Duplicate ids: only the indexed (last) copy takes part
        if !std::ptr::eq(index[id], message) || !seen_ids.insert(id) {
            continue;
        }
        order.push(id);

        if let Some(parent) = resolve_parent(message, id, &index) {
            parent_of.insert(id, parent);
            children_of.entry(parent).or_default().push(id);
        }
    }

    // Distinct roots in first-seen order
    let mut roots: Vec<&MessageId> = Vec::new();
    let mut root_set: HashSet<&MessageId> = HashSet::new();
    for id in &order {
        let root = find_root(*id, &parent_of);
        if root_set.insert(root) {
            roots.push(root);
        }
    }

    let mut visited: HashSet<&MessageId> = HashSet::new();
    let mut threads: Vec<Thread> = Vec::new();

    for root in roots {
        let members = collect_members(root, &children_of, &index, &mut visited);
        if !members.is_empty() {
            threads.push(Thread::new(ThreadId::new(root.as_str()), members));
        }
    }

    // Only reachable with cyclic references: anything not yet emitted
    // becomes its own thread rather than being dropped.
    for &id in &order {
        if visited.insert(id) {
            threads.push(Thread::new(ThreadId::new(id.as_str()), vec![index[id].clone()]));
        }
    }

    // Stable: equal dates keep first-seen order
    threads.sort_by(|a, b| match (a.latest_date, b.latest_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    threads
}

/// Index messages by id; the last message wins on duplicate ids
fn index_by_id(messages: &[Message]) -> HashMap<&MessageId, &Message> {
    let mut index = HashMap::with_capacity(messages.len());
    for message in messages {
        if let Some(id) = message.resolvable_id() {
            index.insert(id, message);
        }
    }
    index
}

/// Pick the parent of `message`
///
/// A known `In-Reply-To` wins, then the most recent known reference. When
/// nothing is known the unresolved `In-Reply-To` (or newest reference) is
/// kept so that replies to the same missing message share a virtual root.
/// Self references are ignored.
fn resolve_parent<'a>(
    message: &'a Message,
    id: &MessageId,
    index: &HashMap<&'a MessageId, &'a Message>,
) -> Option<&'a MessageId> {
    let in_reply_to = message.in_reply_to.as_ref().filter(|p| *p != id && !p.is_empty());

    if let Some(parent) = in_reply_to
        && index.contains_key(parent)
    {
        return Some(parent);
    }

    let mut references = message
        .references
        .iter()
        .rev()
        .filter(|r| *r != id && !r.is_empty());

    if let Some(parent) = references.clone().find(|r| index.contains_key(*r)) {
        return Some(parent);
    }

    in_reply_to.or_else(|| references.next())
}

/// Walk up the parent chain to the outermost ancestor
///
/// The per-walk visited set stops the walk on cyclic references, so it
/// takes at most one step per distinct id.
fn find_root<'a>(
    id: &'a MessageId,
    parent_of: &HashMap<&'a MessageId, &'a MessageId>,
) -> &'a MessageId {
    let mut current = id;
    let mut walked: HashSet<&MessageId> = HashSet::new();
    walked.insert(current);

    while let Some(&parent) = parent_of.get(current) {
        if !walked.insert(parent) {
            break;
        }
        current = parent;
    }

    current
}

/// Breadth-first collection of the messages under `root`
///
/// `visited` spans the whole build so no message lands in two threads. The
/// root itself is only included when it is a fetched message.
fn collect_members<'a>(
    root: &'a MessageId,
    children_of: &HashMap<&'a MessageId, Vec<&'a MessageId>>,
    index: &HashMap<&'a MessageId, &'a Message>,
    visited: &mut HashSet<&'a MessageId>,
) -> Vec<Message> {
    let mut members = Vec::new();
    let mut queue: VecDeque<&MessageId> = VecDeque::new();
    let mut queued: HashSet<&MessageId> = HashSet::new();
    queue.push_back(root);
    queued.insert(root);

    while let Some(id) = queue.pop_front() {
        if let Some(message) = index.get(id)
            && visited.insert(id)
        {
            members.push((*message).clone());
        }

        for &child in children_of.get(id).into_iter().flatten() {
            if !visited.contains(child) && queued.insert(child) {
                queue.push_back(child);
            }
        }
    }

    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmailAddress;
    use chrono::{TimeZone, Utc};

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn msg(id: &str) -> crate::models::MessageBuilder {
        Message::builder()
            .id(id)
            .subject(format!("Subject {}", id))
            .from(EmailAddress::new(format!("{}@example.com", id.to_lowercase())))
    }

    fn ids(thread: &Thread) -> Vec<&str> {
        thread
            .messages
            .iter()
            .map(|m| m.id.as_ref().unwrap().as_str())
            .collect()
    }

    #[test]
    fn test_simple_chain() {
        let messages = vec![
            msg("A").date(at(1)).build(),
            msg("B").date(at(2)).in_reply_to("A").build(),
            msg("C").date(at(3)).in_reply_to("B").references(["A", "B"]).build(),
        ];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id.as_str(), "A");
        assert_eq!(ids(&threads[0]), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_virtual_root() {
        let messages = vec![msg("X").in_reply_to("missing").build()];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id.as_str(), "missing");
        assert_eq!(ids(&threads[0]), vec!["X"]);
    }

    #[test]
    fn test_siblings_share_virtual_root() {
        let messages = vec![
            msg("X").date(at(1)).in_reply_to("missing").build(),
            msg("Y").date(at(2)).references(["missing"]).build(),
        ];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id.as_str(), "missing");
        assert_eq!(ids(&threads[0]), vec!["X", "Y"]);
    }

    #[test]
    fn test_references_fallback_uses_most_recent_known() {
        // In-Reply-To points outside the window; References has known ids
        let messages = vec![
            msg("A").date(at(1)).build(),
            msg("B").date(at(2)).in_reply_to("A").build(),
            msg("D").date(at(4)).in_reply_to("C").references(["A", "B", "C"]).build(),
        ];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(ids(&threads[0]), vec!["A", "B", "D"]);
    }

    #[test]
    fn test_self_reference_is_ignored() {
        let messages = vec![msg("A").in_reply_to("A").references(["A"]).build()];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id.as_str(), "A");
        assert_eq!(ids(&threads[0]), vec!["A"]);
    }

    #[test]
    fn test_cycle_terminates_and_keeps_every_message() {
        let messages = vec![
            msg("A").date(at(1)).in_reply_to("B").build(),
            msg("B").date(at(2)).in_reply_to("A").build(),
            msg("C").date(at(3)).in_reply_to("A").build(),
        ];

        let threads = build_threads(&messages);
        let total: usize = threads.iter().map(Thread::message_count).sum();
        assert_eq!(total, 3);

        let mut all: Vec<&str> = threads.iter().flat_map(ids).collect();
        all.sort();
        assert_eq!(all, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_messages_without_id_are_excluded() {
        let messages = vec![
            Message::builder().subject("no id").build(),
            Message::builder().id("").subject("empty id").build(),
            msg("A").build(),
        ];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(ids(&threads[0]), vec!["A"]);
    }

    #[test]
    fn test_duplicate_ids_last_write_wins() {
        let messages = vec![
            msg("A").subject("first copy").build(),
            msg("A").subject("second copy").build(),
        ];

        let threads = build_threads(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].message_count(), 1);
        assert_eq!(threads[0].messages[0].subject, "second copy");
    }

    #[test]
    fn test_thread_order_by_latest_date_desc() {
        let messages = vec![
            msg("old").date(at(1)).build(),
            msg("undated").build(),
            msg("new").date(at(9)).build(),
            msg("mid").date(at(5)).build(),
            msg("reply-to-old").date(at(7)).in_reply_to("old").build(),
        ];

        let threads = build_threads(&messages);
        let roots: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(roots, vec!["new", "old", "mid", "undated"]);
    }

    #[test]
    fn test_missing_dates_sort_first_within_thread() {
        let messages = vec![
            msg("A").date(at(3)).build(),
            msg("B").in_reply_to("A").build(),
        ];

        let threads = build_threads(&messages);
        assert_eq!(ids(&threads[0]), vec!["B", "A"]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let messages = vec![
            msg("A").date(at(1)).build(),
            msg("B").date(at(2)).in_reply_to("A").build(),
            msg("C").date(at(3)).in_reply_to("gone").build(),
            msg("D").date(at(4)).references(["gone", "C"]).build(),
            msg("E").date(at(5)).build(),
        ];

        let first = build_threads(&messages);
        let flattened: Vec<Message> = first.iter().flat_map(|t| t.messages.clone()).collect();
        let second = build_threads(&flattened);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.message_count(), b.message_count());
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(build_threads(&[]).is_empty());
    }
}

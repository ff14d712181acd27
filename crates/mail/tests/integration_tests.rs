//! Integration tests for the mail crate
//!
//! These tests drive the public API end to end: threading a fetched batch,
//! watching an in-memory mailbox on a fake clock, and delivering through
//! on-disk staging and outbox stores.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mail::client::{IdleStep, InMemoryMailbox, InMemoryTransport, MailboxClient, MailboxOp};
use mail::config::WatchConfig;
use mail::delivery::{AccountManager, DeliveryCoordinator, FailureSeverity};
use mail::error::MailError;
use mail::models::{
    Account, EmailAddress, Message, MessageId, OutboxStatus, OutgoingMessage, StagingConfig,
};
use mail::storage::{
    FileStagingStore, InMemoryOutbox, MailboxStaging, OutboxStore, SqliteOutbox, StagingStore,
};
use mail::threading::{ThreadReport, build_threads};
use mail::watch::{FakeClock, JsonLinesSink, MailboxWatcher, WatchEvent};
use tempfile::TempDir;

/// Helper to create a dated message
fn make_message(id: &str, hour: u32) -> Message {
    Message::builder()
        .id(id)
        .subject(format!("Subject {}", id))
        .from(EmailAddress::with_name("Test User", "test@example.com"))
        .to(vec![EmailAddress::new("recipient@example.com")])
        .date(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap())
        .folder("INBOX")
        .build()
}

fn thread_ids(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|m| m.id.as_ref().map(MessageId::as_str))
        .collect()
}

// === Threading ===

#[test]
fn test_reply_chain_forms_one_thread() {
    let a = make_message("A", 8);
    let b = Message {
        in_reply_to: Some(MessageId::new("A")),
        ..make_message("B", 9)
    };
    let c = Message {
        in_reply_to: Some(MessageId::new("B")),
        references: vec![MessageId::new("A"), MessageId::new("B")],
        ..make_message("C", 10)
    };

    let threads = build_threads(&[c, a, b]);

    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id.as_str(), "A");
    assert_eq!(threads[0].messages.len(), 3);
    assert_eq!(thread_ids(&threads[0].messages), vec!["A", "B", "C"]);
}

#[test]
fn test_missing_parent_becomes_virtual_root() {
    let x = Message {
        in_reply_to: Some(MessageId::new("missing")),
        ..make_message("X", 8)
    };

    let threads = build_threads(&[x]);

    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id.as_str(), "missing");
    assert_eq!(thread_ids(&threads[0].messages), vec!["X"]);
}

#[test]
fn test_every_message_lands_in_exactly_one_thread() {
    let batch = vec![
        make_message("solo", 7),
        Message {
            in_reply_to: Some(MessageId::new("loop-b")),
            ..make_message("loop-a", 8)
        },
        Message {
            in_reply_to: Some(MessageId::new("loop-a")),
            ..make_message("loop-b", 9)
        },
        Message {
            in_reply_to: Some(MessageId::new("self")),
            ..make_message("self", 10)
        },
        Message {
            references: vec![MessageId::new("root"), MessageId::new("mid")],
            ..make_message("leaf", 11)
        },
        Message {
            in_reply_to: Some(MessageId::new("root")),
            ..make_message("mid", 12)
        },
    ];

    let threads = build_threads(&batch);

    let mut seen = HashSet::new();
    for thread in &threads {
        for id in thread_ids(&thread.messages) {
            assert!(seen.insert(id.to_string()), "{} appears twice", id);
        }
    }
    assert_eq!(seen.len(), batch.len());
}

#[test]
fn test_threading_is_idempotent() {
    let batch = vec![
        make_message("A", 8),
        Message {
            in_reply_to: Some(MessageId::new("A")),
            ..make_message("B", 9)
        },
        make_message("C", 10),
    ];

    assert_eq!(build_threads(&batch), build_threads(&batch));
}

#[test]
fn test_thread_report_document() {
    let batch = vec![
        make_message("A", 8),
        Message {
            in_reply_to: Some(MessageId::new("A")),
            from: EmailAddress::new("bob@example.com"),
            ..make_message("B", 9)
        },
    ];
    let threads = build_threads(&batch);
    let json = ThreadReport::from_threads(batch.len(), &threads)
        .to_json()
        .unwrap();

    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["total_messages"], 2);
    assert_eq!(doc["thread_count"], 1);
    let thread = &doc["threads"][0];
    assert_eq!(thread["thread_id"], "A");
    assert_eq!(thread["message_count"], 2);
    assert_eq!(thread["messages"][1]["in_reply_to"], "A");
    assert_eq!(thread["participants"].as_array().unwrap().len(), 2);
}

// === Watching ===

fn watch_config(max_events: u64) -> WatchConfig {
    WatchConfig {
        poll_interval_secs: 30,
        reconnect_delay_secs: 5,
        max_events,
        ..WatchConfig::default()
    }
}

fn unread(id: &str) -> Message {
    Message {
        is_unread: true,
        ..make_message(id, 12)
    }
}

#[test]
fn test_watch_emits_json_lines_for_new_mail() {
    let clock = Arc::new(FakeClock::new());
    let mailbox = InMemoryMailbox::with_clock(clock.clone());
    mailbox.deliver("INBOX", unread("<n1@example.com>"));
    mailbox.signal_after(2);

    let mut watcher =
        MailboxWatcher::new(mailbox.clone(), "work", watch_config(1)).with_clock(clock.clone());
    let mut sink = JsonLinesSink::new(Vec::new());
    let summary = watcher.run(&mut sink);

    assert_eq!(summary.events, 1);
    let output = String::from_utf8(sink.into_inner()).unwrap();
    let events: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let new_mail: Vec<_> = events.iter().filter(|e| e["event"] == "new_mail").collect();
    assert_eq!(new_mail.len(), 1);
    assert_eq!(new_mail[0]["account"], "work");
    assert_eq!(new_mail[0]["folder"], "INBOX");
    assert_eq!(new_mail[0]["event_number"], 1);
    assert_eq!(new_mail[0]["new_messages"], 1);
    assert_eq!(
        new_mail[0]["messages"][0]["message_id"],
        "<n1@example.com>"
    );

    // Two quiet slices before the signal
    let fetch = mailbox
        .calls()
        .into_iter()
        .find(|c| c.op == MailboxOp::FetchUnread)
        .unwrap();
    assert_eq!(fetch.at.as_secs(), 60);
    assert!(!mailbox.is_connected());
}

#[test]
fn test_watch_survives_connection_drop() {
    let clock = Arc::new(FakeClock::new());
    let mailbox = InMemoryMailbox::with_clock(clock.clone());
    mailbox.deliver("INBOX", unread("<n1@example.com>"));
    mailbox.script_idle([
        IdleStep::Quiet,
        IdleStep::Fail(MailError::connection("reset by peer")),
        IdleStep::NewData,
    ]);

    let mut watcher =
        MailboxWatcher::new(mailbox.clone(), "work", watch_config(1)).with_clock(clock.clone());
    let mut events: Vec<WatchEvent> = Vec::new();
    let summary = watcher.run(&mut events);

    assert_eq!(summary.events, 1);
    assert_eq!(summary.reconnects, 1);
    assert_eq!(summary.errors, 1);

    let retry: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WatchEvent::Error { retry_in_secs, .. } => Some(*retry_in_secs),
            _ => None,
        })
        .collect();
    assert_eq!(retry, vec![Some(5)]);

    // Drop at 30s, reconnect after the 5s backoff
    let connects: Vec<u64> = mailbox
        .calls()
        .into_iter()
        .filter(|c| c.op == MailboxOp::Connect)
        .map(|c| c.at.as_secs())
        .collect();
    assert_eq!(connects, vec![0, 35]);
    assert_eq!(events.iter().filter(|e| e.is_new_mail()).count(), 1);
}

#[test]
fn test_watch_refetches_unread_on_each_event() {
    let clock = Arc::new(FakeClock::new());
    let mailbox = InMemoryMailbox::with_clock(clock.clone());
    mailbox.deliver("INBOX", unread("<n1@example.com>"));
    mailbox.signal_after(0);
    mailbox.signal_after(0);

    let mut watcher =
        MailboxWatcher::new(mailbox.clone(), "work", watch_config(2)).with_clock(clock.clone());
    let mut events: Vec<WatchEvent> = Vec::new();
    watcher.run(&mut events);

    // The same unread message is reported again
    let counts: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            WatchEvent::NewMail { new_messages, .. } => Some(*new_messages),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![1, 1]);
}

// === Delivery ===

fn outgoing(subject: &str) -> OutgoingMessage {
    OutgoingMessage::new(vec!["bob@example.com".into()], subject, "Quarterly numbers attached.")
}

fn file_account(dir: &TempDir) -> Account {
    Account::new("work", "me@work.example", "primary").with_staging(StagingConfig::File {
        path: dir.path().join("staging"),
    })
}

fn file_coordinator(
    dir: &TempDir,
    transport: Arc<InMemoryTransport>,
) -> (DeliveryCoordinator, Arc<SqliteOutbox>) {
    let mut accounts = AccountManager::new();
    accounts.add_account(file_account(dir)).unwrap();
    accounts.add_transport(transport);
    accounts.configure_staging("work", None).unwrap();

    let outbox = Arc::new(SqliteOutbox::new(dir.path().join("outbox.db")).unwrap());
    (DeliveryCoordinator::new(accounts, outbox.clone()), outbox)
}

#[test]
fn test_failed_send_survives_restart_and_retries() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(InMemoryTransport::new("primary"));
    transport.fail_always(MailError::Transport("451 try again later".into()));

    let staged_ref = {
        let (coordinator, outbox) = file_coordinator(&dir, transport.clone());
        let result = coordinator.send_via_outbox(outgoing("Report"), "work");

        assert!(!result.success);
        assert!(result.staged);
        assert_eq!(result.severity(), Some(FailureSeverity::Transport));
        assert!(result.error.as_deref().unwrap().contains("451"));

        let entries = outbox.list_for_account("work").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OutboxStatus::Failed);
        result.stage_ref.unwrap()
    };

    // Staged copy is on disk and readable by a fresh store
    let staging = FileStagingStore::new(dir.path().join("staging")).unwrap();
    let raw = staging.load(&staged_ref).unwrap().unwrap();
    assert!(String::from_utf8_lossy(&raw).contains("Subject: Report"));

    transport.recover();
    let (coordinator, outbox) = file_coordinator(&dir, transport.clone());
    let results = coordinator.retry_staged("work");

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(outbox.count().unwrap(), 0);
    assert!(staging.list().unwrap().is_empty());
}

#[test]
fn test_resubmitted_message_leaves_first_copy_retryable() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(InMemoryTransport::new("primary"));
    transport.fail_next(MailError::connection("reset by peer"));
    let (coordinator, outbox) = file_coordinator(&dir, transport.clone());
    let report = || outgoing("Report").with_message_id("<fixed@work.example>");

    let first = coordinator.send_via_outbox(report(), "work");
    let second = coordinator.send_via_outbox(report(), "work");
    assert!(!first.success);
    assert!(second.success);

    let pending = outbox.list_for_account("work").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].stage_ref, first.stage_ref.unwrap());
    let staging = FileStagingStore::new(dir.path().join("staging")).unwrap();
    assert!(staging.load(&pending[0].stage_ref).unwrap().is_some());

    let results = coordinator.retry_staged("work");
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].severity(), None);
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(outbox.count().unwrap(), 0);
    assert!(staging.list().unwrap().is_empty());
}

#[test]
fn test_staging_failure_never_reaches_transport() {
    let mailbox = InMemoryMailbox::new();
    mailbox.fail_next(MailboxOp::Append, MailError::protocol("NO [OVERQUOTA]"));
    let transport = Arc::new(InMemoryTransport::new("primary"));

    let mut accounts = AccountManager::new();
    accounts
        .add_account(Account::new("work", "me@work.example", "primary"))
        .unwrap();
    accounts.add_transport(transport.clone());
    accounts
        .configure_staging("work", Some(Box::new(mailbox.clone())))
        .unwrap();
    let outbox = Arc::new(InMemoryOutbox::new());
    let coordinator = DeliveryCoordinator::new(accounts, outbox.clone());

    let result = coordinator.send_via_outbox(outgoing("Report"), "work");

    assert!(!result.success);
    assert!(!result.staged);
    assert!(result.stage_error.as_deref().is_some_and(|e| !e.is_empty()));
    assert_eq!(result.severity(), Some(FailureSeverity::Staging));
    assert_eq!(transport.attempts(), 0);
    assert_eq!(outbox.count().unwrap(), 0);
}

#[test]
fn test_mailbox_staging_keeps_copy_after_transport_failure() {
    let mut mailbox = InMemoryMailbox::new();
    let transport = Arc::new(InMemoryTransport::new("primary"));
    transport.fail_next(MailError::Transport("550 relay denied".into()));

    let mut accounts = AccountManager::new();
    accounts
        .add_account(Account::new("work", "me@work.example", "primary"))
        .unwrap();
    accounts.add_transport(transport.clone());
    let staging = Arc::new(MailboxStaging::new(Box::new(mailbox.clone()), "Outbox"));
    accounts.set_staging("work", staging.clone());
    let coordinator = DeliveryCoordinator::new(accounts, Arc::new(InMemoryOutbox::new()));

    let result = coordinator.send_via_outbox(outgoing("Report"), "work");

    assert!(!result.success);
    assert!(result.staged);
    let message_id = result.message_id.unwrap();
    assert!(mailbox.contains("Outbox", &message_id));
    assert!(staging.load(&result.stage_ref.unwrap()).unwrap().is_some());

    mailbox.connect().unwrap();
    assert_eq!(mailbox.folder_status("Outbox").unwrap().messages, 1);
}

#[test]
fn test_batch_across_accounts_uses_fallback() {
    let primary = Arc::new(InMemoryTransport::new("primary"));
    let backup = Arc::new(InMemoryTransport::new("backup"));
    let personal = Arc::new(InMemoryTransport::new("personal"));
    primary.fail_always(MailError::connection("timed out"));

    let dir = TempDir::new().unwrap();
    let staging = |name: &str| StagingConfig::File {
        path: dir.path().join(name),
    };

    let mut accounts = AccountManager::new();
    accounts
        .add_account(
            Account::new("work", "me@work.example", "primary")
                .with_fallback("backup")
                .with_staging(staging("work")),
        )
        .unwrap();
    accounts
        .add_account(Account::new("home", "me@home.example", "personal").with_staging(staging("home")))
        .unwrap();
    accounts.add_transport(primary.clone());
    accounts.add_transport(backup.clone());
    accounts.add_transport(personal.clone());
    accounts.configure_staging("work", None).unwrap();
    accounts.configure_staging("home", None).unwrap();
    let coordinator = DeliveryCoordinator::new(accounts, Arc::new(InMemoryOutbox::new()));

    let results = coordinator.send_batch(vec![
        ("work".to_string(), outgoing("one")),
        ("home".to_string(), outgoing("two")),
        ("work".to_string(), outgoing("three")),
    ]);

    let accounts: Vec<&str> = results.iter().map(|r| r.account.as_str()).collect();
    assert_eq!(accounts, vec!["work", "home", "work"]);
    assert!(results.iter().all(|r| r.success));
    assert!(results[0].fallback_used && results[2].fallback_used);
    assert!(!results[1].fallback_used);
    assert_eq!(backup.sent().len(), 2);
    assert_eq!(personal.sent().len(), 1);
    assert!(FileStagingStore::new(dir.path().join("work")).unwrap().list().unwrap().is_empty());
}

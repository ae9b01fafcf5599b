/*
 * portal_endpoint.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the portal control plane: authentication and
 * throttling, folder and message operations with serial tracking,
 * contacts, config, alerts, composition/send, and sealed storage. All
 * collaborators are the in-memory implementations.
 *
 * Run with:
 *   cargo test -p fermoposta_core --test portal_endpoint
 */

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};

use fermoposta_core::auth::verification_token;
use fermoposta_core::mailbox::{status, Message};
use fermoposta_core::portal::PortalResponse;
use fermoposta_core::session::{serial_increment, ObjectClass, Session};
use fermoposta_core::storage::{
    BlobStore, DataStore, FolderContext, MemoryBlobs, MemoryCache, MemoryRelay, MemoryStore,
};
use fermoposta_core::{CoreConfig, Portal};

struct Harness {
    portal: Arc<Portal>,
    store: Arc<MemoryStore>,
    blobs: Arc<MemoryBlobs>,
    cache: Arc<MemoryCache>,
    relay: Arc<MemoryRelay>,
    user_id: u64,
    inbox_id: u64,
}

const USERNAME: &str = "magnus";
const PASSWORD: &str = "antediluvian";

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(MemoryBlobs::new());
    let cache = Arc::new(MemoryCache::new());
    let relay = Arc::new(MemoryRelay::new());
    let user_id = store.seed_user(USERNAME, &verification_token(USERNAME, PASSWORD));
    let inbox_id = store.folders(user_id, FolderContext::Mail).unwrap()[0].folder_id;
    let portal = Portal::new(
        CoreConfig::default(),
        store.clone(),
        blobs.clone(),
        cache.clone(),
        relay.clone(),
    );
    Harness { portal, store, blobs, cache, relay, user_id, inbox_id }
}

fn raw_message() -> &'static [u8] {
    b"From: Alice <alice@example.com>\r\n\
To: magnus@example.com\r\n\
Subject: status report\r\n\
Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n\
\r\n\
All systems nominal.\r\n"
}

fn seed_message(h: &Harness, folder_id: u64, status_bits: u64) -> u64 {
    let id = h.store.seed_message(
        h.user_id,
        Message {
            message_id: 0,
            folder_id,
            server: String::from("local"),
            status: status_bits,
            size: raw_message().len() as u64,
            signature_id: 0,
            signature_key: 0,
            created_utc: Utc::now(),
            visible: true,
            tags: Vec::new(),
        },
    );
    h.blobs
        .put(h.user_id, id, "local", Bytes::from_static(raw_message()))
        .unwrap();
    id
}

fn rpc(h: &Harness, session: &Arc<Session>, method: &str, params: Value) -> Value {
    let body = if params.is_null() {
        json!({ "jsonrpc": "2.0", "method": method, "id": 1 })
    } else {
        json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 })
    };
    let response: PortalResponse = h.portal.handle(session, body.to_string().as_bytes());
    serde_json::from_str(&response.body).unwrap()
}

fn result(envelope: &Value) -> &Value {
    assert!(
        envelope.get("error").is_none(),
        "unexpected error: {}",
        envelope
    );
    &envelope["result"]
}

fn error_message(envelope: &Value) -> String {
    envelope["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn login(h: &Harness) -> Arc<Session> {
    let session = h.portal.open_session(None);
    let reply = rpc(
        h,
        &session,
        "auth",
        json!({ "username": USERNAME, "password": PASSWORD }),
    );
    assert_eq!(result(&reply)["auth"], "success");
    session
}

// ============================================================
// Authentication
// ============================================================

#[test]
fn auth_then_list_shows_inbox_at_root() {
    let h = harness();
    let session = login(&h);

    let reply = rpc(&h, &session, "folders.list", json!({ "context": "mail" }));
    let folders = result(&reply).as_array().unwrap();
    assert!(folders
        .iter()
        .any(|f| f["name"] == "Inbox" && f["parentID"] == 0));
}

#[test]
fn auth_rejects_bad_credentials_without_leaking() {
    let h = harness();
    let session = h.portal.open_session(None);

    let wrong_pass = rpc(
        &h,
        &session,
        "auth",
        json!({ "username": USERNAME, "password": "nope" }),
    );
    let wrong_user = rpc(
        &h,
        &session,
        "auth",
        json!({ "username": "nobody", "password": "nope" }),
    );
    // Same taxonomy either way: the reply never says which half was wrong.
    assert_eq!(error_message(&wrong_pass), error_message(&wrong_user));
}

#[test]
fn locked_account_answers_positively() {
    let h = harness();
    h.store
        .set_user_lock(h.user_id, fermoposta_core::storage::AccountLock::Abuse);
    let session = h.portal.open_session(None);
    let reply = rpc(
        &h,
        &session,
        "auth",
        json!({ "username": USERNAME, "password": PASSWORD }),
    );
    assert_eq!(result(&reply)["auth"], "locked");
    assert_eq!(result(&reply)["lock"], "abuse");
}

#[test]
fn sixteen_failures_throttle_the_subnet() {
    let h = harness();
    let session = h.portal.open_session(None);

    for _ in 0..16 {
        let reply = rpc(
            &h,
            &session,
            "auth",
            json!({ "username": USERNAME, "password": "wrong" }),
        );
        assert!(reply.get("error").is_some());
    }
    // The seventeenth attempt is refused before any credential check,
    // even with the right password.
    let reply = rpc(
        &h,
        &session,
        "auth",
        json!({ "username": USERNAME, "password": PASSWORD }),
    );
    assert!(error_message(&reply).contains("too many failed logins"));
}

#[test]
fn anonymous_sessions_cannot_reach_user_methods() {
    let h = harness();
    let session = h.portal.open_session(None);
    let reply = rpc(&h, &session, "folders.list", json!({ "context": "mail" }));
    assert!(error_message(&reply).contains("not authenticated"));
}

#[test]
fn logout_terminates_the_session() {
    let h = harness();
    let session = login(&h);
    let reply = rpc(&h, &session, "logout", Value::Null);
    assert_eq!(result(&reply)["logout"], "success");
    let reply = rpc(&h, &session, "folders.list", json!({ "context": "mail" }));
    assert!(reply.get("error").is_some());
}

// ============================================================
// Envelope validation
// ============================================================

#[test]
fn malformed_requests_use_reserved_codes() {
    let h = harness();
    let session = h.portal.open_session(None);

    let response = h.portal.handle(&session, b"not json at all");
    let envelope: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(envelope["error"]["code"], -32700);

    let reply = rpc(&h, &session, "no.such.method", Value::Null);
    assert_eq!(reply["error"]["code"], -32601);

    let reply = rpc(
        &h,
        &session,
        "auth",
        json!({ "username": "u", "password": "p", "smuggled": true }),
    );
    assert_eq!(reply["error"]["code"], -32602);
}

#[test]
fn violations_terminate_the_connection() {
    let h = harness();
    let session = h.portal.open_session(None);
    let limit = CoreConfig::default().violation_limit;

    let mut terminated = false;
    for _ in 0..limit {
        let response = h.portal.handle(&session, b"{broken");
        terminated = response.terminate;
    }
    assert!(terminated);
}

// ============================================================
// Folders
// ============================================================

#[test]
fn create_and_rename_folder_with_nested_inbox() {
    let h = harness();
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "Projects" }),
    );
    let projects = result(&reply)["folderID"].as_u64().unwrap();

    // Inbox as a subfolder is allowed; only the top level is reserved.
    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "Projects.Inbox" }),
    );
    result(&reply);

    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "Inbox" }),
    );
    assert!(error_message(&reply).contains("reserved"));

    let reply = rpc(
        &h,
        &session,
        "folders.rename",
        json!({ "context": "mail", "folderID": projects, "name": "Work" }),
    );
    result(&reply);

    let reply = rpc(&h, &session, "folders.list", json!({ "context": "mail" }));
    let names: Vec<String> = result(&reply)
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&String::from("Work")));
    assert!(names.contains(&String::from("Work.Inbox")));
    assert!(!names.contains(&String::from("Projects")));
}

#[test]
fn folder_add_with_parent_reference() {
    let h = harness();
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "a" }),
    );
    let parent = result(&reply)["folderID"].as_u64().unwrap();
    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "b", "parentID": parent }),
    );
    result(&reply);

    let reply = rpc(&h, &session, "folders.list", json!({ "context": "mail" }));
    assert!(result(&reply)
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["name"] == "a.b"));
}

#[test]
fn folder_remove_protects_inbox() {
    let h = harness();
    let session = login(&h);
    let reply = rpc(
        &h,
        &session,
        "folders.remove",
        json!({ "context": "mail", "folderID": h.inbox_id }),
    );
    assert!(error_message(&reply).contains("reserved"));
}

// ============================================================
// Messages
// ============================================================

#[test]
fn move_then_flag_bumps_serial_twice() {
    let h = harness();
    let a = seed_message(&h, h.inbox_id, 0);
    let b = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "Archive" }),
    );
    let archive = result(&reply)["folderID"].as_u64().unwrap();

    let reply = rpc(
        &h,
        &session,
        "messages.move",
        json!({
            "sourceFolderID": h.inbox_id,
            "targetFolderID": archive,
            "messageIDs": [a, b],
        }),
    );
    assert_eq!(result(&reply)["moved"], 2);

    let reply = rpc(
        &h,
        &session,
        "messages.flag",
        json!({
            "action": "add",
            "flags": ["seen"],
            "messageIDs": [a],
            "folderID": archive,
        }),
    );
    result(&reply);

    let reply = rpc(
        &h,
        &session,
        "messages.flag",
        json!({
            "action": "list",
            "messageIDs": [a],
            "folderID": archive,
        }),
    );
    let flags = result(&reply)[a.to_string()].as_array().unwrap();
    assert!(flags.iter().any(|f| f == "seen"));

    // One bump for the move batch, one for the flag batch; list bumps
    // nothing.
    let reply = rpc(&h, &session, "meta", Value::Null);
    assert_eq!(result(&reply)["serials"]["messages"], 2);
}

#[test]
fn list_returns_header_summaries() {
    let h = harness();
    let m = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "messages.list",
        json!({ "folderID": h.inbox_id }),
    );
    let entries = result(&reply).as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["messageID"], m);
    assert_eq!(entries[0]["subject"], "status report");
    assert!(entries[0]["snippet"]
        .as_str()
        .unwrap()
        .contains("All systems nominal"));
}

#[test]
fn copy_duplicates_rows_and_blobs() {
    let h = harness();
    let m = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "mail", "name": "Copies" }),
    );
    let copies = result(&reply)["folderID"].as_u64().unwrap();

    let reply = rpc(
        &h,
        &session,
        "messages.copy",
        json!({
            "sourceFolderID": h.inbox_id,
            "targetFolderID": copies,
            "messageIDs": [m],
        }),
    );
    assert_eq!(result(&reply)["copied"], 1);
    let pair = result(&reply)["messageIDs"][0].as_array().unwrap();
    assert_eq!(pair[0].as_u64().unwrap(), m);
    let new_id = pair[1].as_u64().unwrap();
    assert_ne!(new_id, m);

    assert_eq!(h.store.messages(h.user_id).unwrap().len(), 2);
    assert!(h.blobs.get(h.user_id, new_id, "local").is_ok());

    let reply = rpc(
        &h,
        &session,
        "messages.copy",
        json!({
            "sourceFolderID": h.inbox_id,
            "targetFolderID": h.inbox_id,
            "messageIDs": [m],
        }),
    );
    assert!(error_message(&reply).contains("must differ"));
}

#[test]
fn remove_deletes_blob_and_row() {
    let h = harness();
    let m = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "messages.remove",
        json!({ "folderID": h.inbox_id, "messageIDs": [m] }),
    );
    assert_eq!(result(&reply)["removed"], 1);
    assert!(h.store.messages(h.user_id).unwrap().is_empty());
    assert!(h.blobs.get(h.user_id, m, "local").is_err());
}

#[test]
fn system_flags_are_protected() {
    let h = harness();
    let m = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "messages.flag",
        json!({
            "action": "add",
            "flags": ["recent"],
            "messageIDs": [m],
            "folderID": h.inbox_id,
        }),
    );
    assert!(error_message(&reply).contains("system flags"));

    let reply = rpc(
        &h,
        &session,
        "messages.flag",
        json!({
            "action": "add",
            "flags": ["bogus"],
            "messageIDs": [m],
            "folderID": h.inbox_id,
        }),
    );
    assert!(error_message(&reply).contains("invalid keyword"));
}

#[test]
fn tags_drive_histogram_and_union() {
    let h = harness();
    let a = seed_message(&h, h.inbox_id, 0);
    let b = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "messages.tag",
        json!({
            "action": "add",
            "tags": ["work", "urgent"],
            "messageIDs": [a],
            "folderID": h.inbox_id,
        }),
    );
    result(&reply);
    let reply = rpc(
        &h,
        &session,
        "messages.tag",
        json!({
            "action": "add",
            "tags": ["work"],
            "messageIDs": [b],
            "folderID": h.inbox_id,
        }),
    );
    result(&reply);

    let reply = rpc(
        &h,
        &session,
        "folders.tags",
        json!({ "context": "mail", "folderID": h.inbox_id }),
    );
    assert_eq!(result(&reply)["work"], 2);
    assert_eq!(result(&reply)["urgent"], 1);

    let reply = rpc(&h, &session, "messages.tags", Value::Null);
    let union = result(&reply).as_array().unwrap();
    assert_eq!(union.len(), 2);

    // Replace with an empty list clears, and the tagged bit follows.
    let reply = rpc(
        &h,
        &session,
        "messages.tag",
        json!({
            "action": "replace",
            "tags": [],
            "messageIDs": [a],
            "folderID": h.inbox_id,
        }),
    );
    result(&reply);
    let row = h
        .store
        .messages(h.user_id)
        .unwrap()
        .into_iter()
        .find(|m| m.message_id == a)
        .unwrap();
    assert!(row.tags.is_empty());
    assert_eq!(row.status & status::TAGGED, 0);
}

#[test]
fn load_sections() {
    let h = harness();
    let m = seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "messages.load",
        json!({ "messageID": m, "section": ["meta", "header", "body"] }),
    );
    let loaded = result(&reply);
    assert_eq!(loaded["meta"]["messageID"], m);
    assert!(loaded["header"].as_str().unwrap().contains("Subject: status report"));
    assert!(loaded["body"].as_str().unwrap().contains("All systems nominal"));

    let reply = rpc(
        &h,
        &session,
        "messages.load",
        json!({ "messageID": m, "section": [] }),
    );
    assert!(reply.get("error").is_some());

    let reply = rpc(
        &h,
        &session,
        "messages.load",
        json!({ "messageID": m, "section": ["bogus"] }),
    );
    assert!(error_message(&reply).contains("invalid keyword"));
}

#[test]
fn search_matches_subject_substring() {
    let h = harness();
    seed_message(&h, h.inbox_id, 0);
    let session = login(&h);

    let reply = rpc(&h, &session, "search", json!({ "query": "STATUS" }));
    assert_eq!(result(&reply).as_array().unwrap().len(), 1);

    let reply = rpc(&h, &session, "search", json!({ "query": "absent" }));
    assert!(result(&reply).as_array().unwrap().is_empty());
}

#[test]
fn stale_serial_forces_refetch() {
    let h = harness();
    let session = login(&h);

    // Another process inserts a message and advances the class serial.
    let m = seed_message(&h, h.inbox_id, 0);
    serial_increment(h.cache.as_ref(), h.user_id, ObjectClass::Messages).unwrap();

    let reply = rpc(
        &h,
        &session,
        "messages.list",
        json!({ "folderID": h.inbox_id }),
    );
    let entries = result(&reply).as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["messageID"], m);
}

// ============================================================
// Contacts
// ============================================================

#[test]
fn contact_lifecycle() {
    let h = harness();
    let session = login(&h);

    let reply = rpc(
        &h,
        &session,
        "folders.add",
        json!({ "context": "contacts", "name": "People" }),
    );
    let book = result(&reply)["folderID"].as_u64().unwrap();

    let reply = rpc(
        &h,
        &session,
        "contacts.add",
        json!({
            "folderID": book,
            "name": "Alice",
            "email": "alice@example.com",
        }),
    );
    let alice = result(&reply)["contactID"].as_u64().unwrap();

    let reply = rpc(
        &h,
        &session,
        "contacts.add",
        json!({ "folderID": book, "name": "Alice" }),
    );
    assert!(error_message(&reply).contains("already in use"));

    let reply = rpc(
        &h,
        &session,
        "contacts.copy",
        json!({ "contactID": alice, "sourceFolderID": book, "targetFolderID": book }),
    );
    result(&reply);

    let reply = rpc(&h, &session, "contacts.list", json!({ "folderID": book }));
    let names: Vec<String> = result(&reply)
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&String::from("Alice")));
    assert!(names.contains(&String::from("Copy of Alice")));

    let reply = rpc(
        &h,
        &session,
        "contacts.load",
        json!({ "folderID": book, "contactID": alice }),
    );
    assert_eq!(result(&reply)["details"]["email"], "alice@example.com");

    let reply = rpc(
        &h,
        &session,
        "contacts.remove",
        json!({ "folderID": book, "contactID": alice }),
    );
    result(&reply);
    let reply = rpc(&h, &session, "contacts.list", json!({ "folderID": book }));
    assert_eq!(result(&reply).as_array().unwrap().len(), 1);
}

// ============================================================
// Config and alerts
// ============================================================

#[test]
fn config_edit_and_critical_protection() {
    let h = harness();
    h.store.seed_config(
        h.user_id,
        "reception",
        fermoposta_core::mailbox::ConfigEntry::critical("enabled"),
    );
    let session = login(&h);

    let reply = rpc(&h, &session, "config.edit", json!({ "theme": "dark" }));
    result(&reply);
    let reply = rpc(&h, &session, "config.load", Value::Null);
    assert_eq!(result(&reply)["theme"]["value"], "dark");
    assert_eq!(result(&reply)["reception"]["flags"][0], "critical");

    let reply = rpc(&h, &session, "config.edit", json!({ "theme": null }));
    result(&reply);
    let reply = rpc(&h, &session, "config.load", Value::Null);
    assert!(result(&reply).get("theme").is_none());

    let reply = rpc(&h, &session, "config.edit", json!({ "reception": null }));
    assert!(error_message(&reply).contains("cannot be deleted"));
}

#[test]
fn alert_acknowledge_is_transactional() {
    let h = harness();
    let good = h.store.seed_alert(h.user_id, "notice", "maintenance window");
    h.store.seed_alert(h.user_id, "warning", "quota nearly full");
    let session = login(&h);

    let reply = rpc(&h, &session, "alert.list", Value::Null);
    assert_eq!(result(&reply).as_array().unwrap().len(), 2);

    // One good id and one bogus id: nothing may be acknowledged.
    let reply = rpc(
        &h,
        &session,
        "alert.acknowledge",
        json!({ "alertIDs": [good, 999_999] }),
    );
    assert!(reply.get("error").is_some());
    let reply = rpc(&h, &session, "alert.list", Value::Null);
    assert_eq!(result(&reply).as_array().unwrap().len(), 2);

    let reply = rpc(
        &h,
        &session,
        "alert.acknowledge",
        json!({ "alertIDs": [good] }),
    );
    result(&reply);
    let reply = rpc(&h, &session, "alert.list", Value::Null);
    assert_eq!(result(&reply).as_array().unwrap().len(), 1);
}

// ============================================================
// Composition and send
// ============================================================

#[test]
fn compose_upload_send() {
    let h = harness();
    let session = login(&h);

    let reply = rpc(&h, &session, "messages.compose", Value::Null);
    let compose_id = result(&reply)["composeID"].as_u64().unwrap();

    let reply = rpc(
        &h,
        &session,
        "attachments.add",
        json!({ "composeID": compose_id, "filename": "report.txt" }),
    );
    let attachment_id = result(&reply)["attachmentID"].as_u64().unwrap();

    h.portal
        .upload_attachment(
            &session,
            compose_id,
            attachment_id,
            Bytes::from_static(b"quarterly numbers"),
        )
        .unwrap();
    // A second body for the same pair is rejected.
    assert!(h
        .portal
        .upload_attachment(&session, compose_id, attachment_id, Bytes::new())
        .is_err());

    let reply = rpc(
        &h,
        &session,
        "messages.send",
        json!({
            "composeID": compose_id,
            "from": "magnus@example.com",
            "to": ["alice@example.com"],
            "cc": [],
            "bcc": ["audit@example.com"],
            "subject": "the report",
            "priority": 2,
            "attachments": [attachment_id],
            "body": { "text": "see attachment", "html": "" },
        }),
    );
    assert_eq!(result(&reply)["send"], "success");

    let submissions = h.relay.submissions();
    assert_eq!(submissions.len(), 1);
    let (from, recipients, mime) = &submissions[0];
    assert_eq!(from, "magnus@example.com");
    assert!(recipients.contains(&String::from("audit@example.com")));
    let mime = String::from_utf8_lossy(mime);
    assert!(mime.contains("Subject: the report"));
    assert!(mime.contains("filename=\"report.txt\""));

    // The composition is destroyed on send.
    let reply = rpc(
        &h,
        &session,
        "attachments.add",
        json!({ "composeID": compose_id, "filename": "late.txt" }),
    );
    assert!(reply.get("error").is_some());
}

#[test]
fn send_rejects_unuploaded_manifest_entries() {
    let h = harness();
    let session = login(&h);

    let reply = rpc(&h, &session, "messages.compose", Value::Null);
    let compose_id = result(&reply)["composeID"].as_u64().unwrap();
    let reply = rpc(
        &h,
        &session,
        "attachments.add",
        json!({ "composeID": compose_id, "filename": "empty.bin" }),
    );
    let attachment_id = result(&reply)["attachmentID"].as_u64().unwrap();

    let reply = rpc(
        &h,
        &session,
        "messages.send",
        json!({
            "composeID": compose_id,
            "from": "magnus@example.com",
            "to": ["alice@example.com"],
            "attachments": [attachment_id],
            "body": { "text": "x" },
        }),
    );
    assert!(error_message(&reply).contains("no uploaded data"));
    assert!(h.relay.submissions().is_empty());
}

// ============================================================
// Sealed storage
// ============================================================

#[test]
fn sealed_message_roundtrip_through_load() {
    let h = harness();
    let session = login(&h);
    h.portal
        .enable_secure_storage(&session, PASSWORD)
        .unwrap();

    let sealed = h.portal.seal_message(h.user_id, raw_message()).unwrap();
    let id = h.store.seed_message(
        h.user_id,
        Message {
            message_id: 0,
            folder_id: h.inbox_id,
            server: String::from("local"),
            status: status::ENCRYPTED,
            size: sealed.len() as u64,
            signature_id: 0,
            signature_key: 0,
            created_utc: Utc::now(),
            visible: true,
            tags: Vec::new(),
        },
    );
    h.blobs
        .put(h.user_id, id, "local", Bytes::from(sealed))
        .unwrap();
    serial_increment(h.cache.as_ref(), h.user_id, ObjectClass::Messages).unwrap();

    let reply = rpc(
        &h,
        &session,
        "messages.load",
        json!({ "messageID": id, "section": ["body"] }),
    );
    assert!(result(&reply)["body"]
        .as_str()
        .unwrap()
        .contains("All systems nominal"));
}

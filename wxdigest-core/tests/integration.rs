//! Integration tests for the store reader, provider client and digest pipeline
//!
//! Stores are built on the fly as SQLite files in a temp directory; the
//! provider is a wiremock server running on its own tokio runtime so the
//! blocking client can be driven from the test thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, TimeZone, Utc};
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wxdigest_core::analysis::{
    Analyzer, AnalyzerOptions, ChatClient, ChatCompletion, ChatRequest, FailureKind,
    HttpChatClient, ResponseRecovery,
};
use wxdigest_core::config::{LlmProvider, ResolvedLlm};
use wxdigest_core::digest::{self, DigestOutcome, DigestPlan, DigestStage, StoreSource};
use wxdigest_core::filter::FilterOptions;
use wxdigest_core::store::{MessageQuery, StoreOptions};
use wxdigest_core::{discover_accounts, Error, MessageType, StoreReader, TimeWindow};

// ============================================
// Fixtures
// ============================================

/// 2024-08-20 00:00 Asia/Shanghai
const DAY_START: i64 = 1_724_083_200;

fn shanghai_day() -> TimeWindow {
    TimeWindow::specific_date("2024-08-20", chrono_tz::Asia::Shanghai).unwrap()
}

/// Create an account directory with a desktop-layout store.
fn desktop_account(root: &Path, wxid: &str) -> PathBuf {
    let msg_dir = root.join(wxid).join("MSG");
    fs::create_dir_all(&msg_dir).unwrap();
    let db = msg_dir.join("MSG.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE MSG (localId INTEGER PRIMARY KEY, StrTalker TEXT, StrContent TEXT,
                          Type INTEGER, CreateTime INTEGER, IsSender INTEGER);
        CREATE TABLE ChatRoom (ChatRoomName TEXT, DisplayName TEXT, nickname TEXT);
        CREATE TABLE Contact (UserName TEXT, NickName TEXT, Remark TEXT);
        INSERT INTO ChatRoom VALUES ('111@chatroom', 'US stocks', '');
        INSERT INTO ChatRoom VALUES ('222@chatroom', '', '');
        INSERT INTO Contact VALUES ('222@chatroom', 'Family group', '');
        INSERT INTO Contact VALUES ('wxid_alice', 'Alice', '');
        INSERT INTO Contact VALUES ('wxid_bob', 'Bobby', 'Bob');
        "#,
    )
    .unwrap();
    db
}

fn insert_message(db: &Path, talker: &str, content: &str, msg_type: i64, create_time: i64) {
    let conn = Connection::open(db).unwrap();
    conn.execute(
        "INSERT INTO MSG (StrTalker, StrContent, Type, CreateTime, IsSender) VALUES (?1, ?2, ?3, ?4, 0)",
        rusqlite::params![talker, content, msg_type, create_time],
    )
    .unwrap();
}

fn open(db: &Path) -> StoreReader {
    StoreReader::open_path(db, &StoreOptions::default()).expect("store should open")
}

fn resolved_llm(base_url: &str) -> ResolvedLlm {
    ResolvedLlm {
        provider: LlmProvider::DeepSeek,
        api_key: "sk-test".to_string(),
        base_url: base_url.to_string(),
        model: "deepseek-chat".to_string(),
        temperature: 0.3,
        max_tokens: 4000,
        timeout_secs: 5,
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "model": "deepseek-chat",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
    })
}

/// A mock provider answering every chat request with `response`.
fn mock_provider(rt: &tokio::runtime::Runtime, response: ResponseTemplate) -> MockServer {
    rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    })
}

// ============================================
// Account discovery
// ============================================

#[test]
fn test_discover_ignores_system_directories() {
    let root = TempDir::new().unwrap();
    for name in ["All Users", "Applet"] {
        fs::create_dir_all(root.path().join(name).join("MSG")).unwrap();
    }

    let accounts = discover_accounts(root.path()).expect("discovery should not fail");
    assert!(accounts.is_empty());
}

#[test]
fn test_discover_finds_accounts_with_marker() {
    let root = TempDir::new().unwrap();
    desktop_account(root.path(), "wxid_b");
    desktop_account(root.path(), "wxid_a");
    fs::create_dir_all(root.path().join("wxid_nomsg")).unwrap();
    fs::create_dir_all(root.path().join("WMPF").join("MSG")).unwrap();

    let accounts = discover_accounts(root.path()).unwrap();
    let ids: Vec<_> = accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["wxid_a", "wxid_b"]);
    assert_eq!(
        StoreReader::locate(&accounts[0]).unwrap(),
        root.path().join("wxid_a/MSG/MSG.db")
    );
}

#[test]
fn test_missing_root_is_an_error() {
    let root = TempDir::new().unwrap();
    let err = discover_accounts(&root.path().join("nope")).unwrap_err();
    assert!(matches!(err, Error::DataDirNotFound(_)));
}

// ============================================
// Store open and schema variants
// ============================================

#[test]
fn test_account_without_store_file() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("wxid_x/MSG")).unwrap();
    let account = discover_accounts(root.path()).unwrap().remove(0);

    match StoreReader::open(&account, &StoreOptions::default()) {
        Err(Error::StoreNotFound(candidates)) => assert_eq!(candidates.len(), 3),
        other => panic!("expected StoreNotFound, got {other:?}"),
    }
}

#[test]
fn test_encrypted_store_is_reported() {
    let root = TempDir::new().unwrap();
    let msg_dir = root.path().join("wxid_x/MSG");
    fs::create_dir_all(&msg_dir).unwrap();
    // Encrypted stores look like random pages to SQLite
    let noise: Vec<u8> = (0..16384u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    fs::write(msg_dir.join("MSG.db"), noise).unwrap();
    let account = discover_accounts(root.path()).unwrap().remove(0);

    let err = StoreReader::open(&account, &StoreOptions::default()).unwrap_err();
    assert!(matches!(err, Error::StoreEncrypted { .. }), "got {err:?}");
}

#[test]
fn test_list_rooms_fills_names_from_contacts() {
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    let reader = open(&db);

    let rooms = reader.list_rooms();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].label(), "US stocks");
    assert_eq!(rooms[1].label(), "Family group");
}

#[test]
fn test_rooms_from_contact_table_only() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("MicroMsg.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE Contact (UserName TEXT, NickName TEXT, Remark TEXT);
        INSERT INTO Contact VALUES ('wxid_alice', 'Alice', '');
        INSERT INTO Contact VALUES ('555@chatroom', 'Crypto', 'My crypto group');
        "#,
    )
    .unwrap();
    drop(conn);

    let rooms = open(&db).list_rooms();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, "555@chatroom");
    assert_eq!(rooms[0].label(), "My crypto group");
}

#[test]
fn test_unknown_schema_yields_empty_results() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("MSG.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch("CREATE TABLE Unrelated (x INTEGER);").unwrap();
    drop(conn);

    let reader = open(&db);
    assert!(reader.list_rooms().is_empty());
    assert!(reader.list_contacts().is_empty());
    assert!(reader.fetch_messages(&MessageQuery::new()).unwrap().is_empty());
}

#[test]
fn test_mobile_message_table() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("EnMicroMsg.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE message (msgId INTEGER, talker TEXT, content TEXT, type INTEGER,
                              createTime INTEGER, isSend INTEGER);
        INSERT INTO message VALUES (1, '777@chatroom', 'wxid_a:
hello', 1, 1724115600000, 0);
        INSERT INTO message VALUES (2, '777@chatroom', 'mine', 1, 1724115660000, 1);
        "#,
    )
    .unwrap();
    drop(conn);

    let messages = open(&db)
        .fetch_messages(&MessageQuery::new().room("777@chatroom"))
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, "wxid_a");
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[0].timestamp.timestamp(), 1_724_115_600);
    assert!(messages[1].is_outgoing);
    assert_eq!(messages[1].sender, "me");
}

// ============================================
// Retrieval and the filter chain
// ============================================

#[test]
fn test_eighty_messages_capped_to_most_recent_fifty() {
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    let templates = [
        "AAPL beat", "NVDA guide", "Fed tonight", "Moutai", "CATL", "BYD", "Tencent",
        "Oil 80", "Gold high", "Yen", "HSI", "Bonds", "TSLA",
    ];
    for i in 0..80i64 {
        let content = format!("wxid_alice:\n{} #{}", templates[i as usize % templates.len()], i);
        insert_message(&db, "111@chatroom", &content, 1, DAY_START + i * 60);
    }
    let window = shanghai_day();
    let reader = open(&db);

    let fetched = reader
        .fetch_messages(
            &MessageQuery::new()
                .room("111@chatroom")
                .between(window.start(), window.end())
                .types(&[MessageType::Text])
                .limit(500),
        )
        .unwrap();
    assert_eq!(fetched.len(), 80);

    let options = FilterOptions {
        max_messages: 50,
        ..Default::default()
    };
    let capped = wxdigest_core::filter::apply(fetched, &window, &options);
    assert_eq!(capped.len(), 50);
    assert!(capped.last().unwrap().content.ends_with("#79"));
    let mark = window.start() + Duration::minutes(81);
    assert!(capped.iter().all(|m| m.timestamp <= mark));
}

#[test]
fn test_store_limit_keeps_latest_rows() {
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    for i in 0..10i64 {
        // Mix second and millisecond timestamps
        let ts = if i % 2 == 0 { DAY_START + i } else { (DAY_START + i) * 1000 };
        insert_message(&db, "111@chatroom", &format!("m{i}"), 1, ts);
    }

    let messages = open(&db)
        .fetch_messages(&MessageQuery::new().room("111@chatroom").limit(3))
        .unwrap();
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m7", "m8", "m9"]);
}

// ============================================
// Provider client
// ============================================

#[test]
fn test_http_client_success_and_usage() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let body = completion_body(r#"{"topics":[{"title":"Chips","discussion":"d","conclusion":"c","stocks":[]}]}"#);
    let server = mock_provider(&rt, ResponseTemplate::new(200).set_body_json(body));

    let client = HttpChatClient::new(&resolved_llm(&server.uri())).unwrap();
    let analysis = Analyzer::new(&client, AnalyzerOptions::default())
        .analyze(&[], &shanghai_day())
        .unwrap();

    assert_eq!(analysis.recovered, ResponseRecovery::Direct);
    assert_eq!(analysis.result.topics[0].title, "Chips");
    assert_eq!(analysis.usage.unwrap().total_tokens, 150);
    assert_eq!(analysis.model, "deepseek-chat");

    let requests = rt.block_on(server.received_requests()).unwrap();
    assert_eq!(requests.len(), 1);
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["model"], "deepseek-chat");
    assert_eq!(sent["max_tokens"], 4000);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["role"], "user");
}

#[test]
fn test_http_client_classifies_statuses() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cases = [
        (401, FailureKind::Unauthorized),
        (403, FailureKind::Forbidden),
        (429, FailureKind::RateLimited),
        (500, FailureKind::Other),
    ];
    for (status, expected) in cases {
        let server = mock_provider(
            &rt,
            ResponseTemplate::new(status)
                .set_body_json(json!({ "error": { "message": format!("status {status}") } })),
        );
        let client = HttpChatClient::new(&resolved_llm(&server.uri())).unwrap();

        match Analyzer::new(&client, AnalyzerOptions::default()).analyze(&[], &shanghai_day()) {
            Err(Error::Provider(failure)) => {
                assert_eq!(failure.kind, expected, "status {status}");
                assert_eq!(failure.status, Some(status));
                assert_eq!(failure.message, format!("status {status}"));
            }
            other => panic!("status {status}: expected provider failure, got {other:?}"),
        }
    }
}

#[test]
fn test_http_client_unreachable_provider() {
    // Nothing listens on port 9 (discard) in the test environment
    let client = HttpChatClient::new(&resolved_llm("http://127.0.0.1:9")).unwrap();
    let err = client
        .complete(&wxdigest_core::analysis::ChatRequest {
            system: "s".into(),
            user: "u".into(),
            temperature: 0.3,
            max_tokens: 10,
        })
        .unwrap_err();
    match err {
        Error::Provider(failure) => {
            assert_eq!(failure.kind, FailureKind::Other);
            assert_eq!(failure.status, None);
        }
        other => panic!("expected provider failure, got {other:?}"),
    }
}

// ============================================
// Digest pipeline
// ============================================

fn plan(db: &Path, output_dir: &Path) -> DigestPlan {
    DigestPlan {
        source: StoreSource::File(db.to_path_buf()),
        store: StoreOptions::default(),
        targets: vec!["US stocks".to_string()],
        window: shanghai_day(),
        filter: FilterOptions {
            types: Some(vec![MessageType::Text]),
            ..Default::default()
        },
        analyzer: AnalyzerOptions::default(),
        output_dir: output_dir.to_path_buf(),
        output_name: None,
    }
}

#[test]
fn test_digest_writes_report() {
    wxdigest_core::logging::init_test();
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    insert_message(&db, "111@chatroom", "wxid_alice:\nNVDA earnings tonight", 1, DAY_START + 3600);
    insert_message(&db, "111@chatroom", "wxid_bob:\nholding through", 1, DAY_START + 3700);
    insert_message(&db, "111@chatroom", "<img/>", 3, DAY_START + 3800);
    insert_message(&db, "222@chatroom", "dinner?", 1, DAY_START + 3900);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let reply = "Here you go:\n{\"topics\":[{\"title\":\"NVDA earnings\",\"discussion\":\"Alice expects a beat\",\"conclusion\":\"Hold\",\"stocks\":[{\"name\":\"NVIDIA\",\"code\":\"NVDA\",\"view\":\"bullish\"}]}]}";
    let server = mock_provider(&rt, ResponseTemplate::new(200).set_body_json(completion_body(reply)));
    let client = HttpChatClient::new(&resolved_llm(&server.uri())).unwrap();

    let out = root.path().join("out");
    let generated_at = Utc.with_ymd_and_hms(2024, 8, 21, 2, 0, 0).unwrap();
    let outcome = digest::run(&plan(&db, &out), &client, generated_at).unwrap();

    let report = match outcome {
        DigestOutcome::Written(report) => report,
        other => panic!("expected a report, got {other:?}"),
    };
    assert_eq!(report.path, out.join("summary_2024-08-20.md"));
    assert_eq!(report.message_count, 2);
    assert_eq!(report.analysis.recovered, ResponseRecovery::BraceSlice);

    let text = fs::read_to_string(&report.path).unwrap();
    assert!(text.contains("NVDA earnings"));
    assert!(text.contains("**NVIDIA NVDA**"));

    // Sender ids are resolved to contact names before prompting
    let requests = rt.block_on(server.received_requests()).unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = sent["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("[01:00] Alice: NVDA earnings tonight"));
    assert!(prompt.contains("Bob: holding through"));
    assert!(!prompt.contains("dinner?"));
}

#[test]
fn test_digest_without_messages_skips_provider() {
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    // Outside the window
    insert_message(&db, "111@chatroom", "old news", 1, DAY_START - 3600);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = mock_provider(&rt, ResponseTemplate::new(500));
    let client = HttpChatClient::new(&resolved_llm(&server.uri())).unwrap();

    let out = root.path().join("out");
    let outcome = digest::run(&plan(&db, &out), &client, Utc::now()).unwrap();
    assert!(matches!(outcome, DigestOutcome::NoMessages { .. }));
    assert!(rt.block_on(server.received_requests()).unwrap().is_empty());
    assert!(!out.join("summary_2024-08-20.md").exists());
}

#[test]
fn test_digest_provider_failure_writes_nothing() {
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    insert_message(&db, "111@chatroom", "AAPL", 1, DAY_START + 60);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = mock_provider(&rt, ResponseTemplate::new(401));
    let client = HttpChatClient::new(&resolved_llm(&server.uri())).unwrap();

    let out = root.path().join("out");
    let err = digest::run(&plan(&db, &out), &client, Utc::now()).unwrap_err();
    assert!(matches!(err, Error::Provider(ref f) if f.kind == FailureKind::Unauthorized));
    assert!(!out.exists());
}

#[test]
fn test_digest_store_errors_precede_network() {
    let root = TempDir::new().unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = mock_provider(&rt, ResponseTemplate::new(200));
    let client = HttpChatClient::new(&resolved_llm(&server.uri())).unwrap();

    let missing = root.path().join("missing/MSG.db");
    let err = digest::run(&plan(&missing, root.path()), &client, Utc::now()).unwrap_err();
    assert!(matches!(err, Error::StoreNotFound(_)));
    assert!(rt.block_on(server.received_requests()).unwrap().is_empty());
}

/// Records when the model is called and takes a write lock on the store at
/// that moment.
struct LockingClient<'a> {
    db: PathBuf,
    events: &'a Mutex<Vec<String>>,
}

impl ChatClient for LockingClient<'_> {
    fn complete(&self, _request: &ChatRequest) -> wxdigest_core::Result<ChatCompletion> {
        self.events.lock().unwrap().push("complete".to_string());
        let conn = Connection::open(&self.db)?;
        conn.busy_timeout(std::time::Duration::from_millis(0))?;
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")?;
        Ok(ChatCompletion {
            content: r#"{"topics":[{"title":"Chips","stocks":[]}]}"#.to_string(),
            usage: None,
            model: "recording".to_string(),
        })
    }
}

#[test]
fn test_digest_releases_store_before_model_call() {
    let root = TempDir::new().unwrap();
    let db = desktop_account(root.path(), "wxid_me");
    insert_message(&db, "111@chatroom", "wxid_alice:\nTSMC capex", 1, DAY_START + 600);

    let events = Mutex::new(Vec::new());
    let client = LockingClient {
        db: db.clone(),
        events: &events,
    };

    let out = root.path().join("out");
    let outcome = digest::run_with_progress(&plan(&db, &out), &client, Utc::now(), |stage| {
        if stage == DigestStage::StoreClosed {
            events.lock().unwrap().push("store closed".to_string());
        }
    })
    .unwrap();

    assert!(matches!(outcome, DigestOutcome::Written(_)));
    assert_eq!(*events.lock().unwrap(), vec!["store closed", "complete"]);
}

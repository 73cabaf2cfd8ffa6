use std::sync::{Arc, Mutex};
use std::time::Duration;

use quectel_lx6::chat::{Chat, ChatError, Matcher, Script, ScriptStep, UnsolicitedMatch};
use quectel_lx6::serial::{self, MockTransport, Transport};

async fn attached_chat(unsol: Vec<UnsolicitedMatch>) -> (Chat, serial::MockHandle) {
    let (mut transport, mock) = MockTransport::new();
    transport.open(Duration::from_secs(1)).await.expect("open");

    let mut chat = Chat::new(unsol, 256);
    chat.attach(serial::shared(transport)).await;
    (chat, mock)
}

#[tokio::test]
async fn steps_run_in_order() {
    let (chat, mock) = attached_chat(Vec::new()).await;
    let script = Script::new(
        "two-step",
        vec![
            ScriptStep::new("$PMTK220,500*2B", Matcher::new("PMTK001,220,3")),
            ScriptStep::new("$PMTK355*31", Matcher::new("PMTK001,355,3")),
        ],
        Duration::from_millis(500),
    );

    let outcome = chat.run_script(&script).await.expect("completed");
    assert_eq!(mock.writes(), vec!["$PMTK220,500*2B", "$PMTK355*31"]);
    assert_eq!(outcome.lines.len(), 2);
    assert_eq!(chat.metrics().scripts_completed, 1);
}

#[tokio::test]
async fn corrupted_lines_are_dropped() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let unsol = vec![UnsolicitedMatch::new(Matcher::new("??RMC"), move |line, _| {
        sink.lock().unwrap().push(line.to_string());
    })];
    let (chat, mock) = attached_chat(unsol).await;

    mock.inject_line("$GPRMC,123519,A*00");
    mock.inject_line("GPRMC,123519,A");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(seen.lock().unwrap().len(), 1);
    let metrics = chat.metrics();
    assert_eq!(metrics.checksum_errors, 1);
    assert_eq!(metrics.unsolicited_lines, 1);
}

#[tokio::test]
async fn detached_chat_rejects_scripts() {
    let (mut chat, _mock) = attached_chat(Vec::new()).await;
    chat.detach().await;

    let script = Script::new("probe", vec![ScriptStep::new("$PMTK000*32", Matcher::any())], Duration::from_millis(100));
    assert!(matches!(chat.run_script(&script).await, Err(ChatError::NotAttached)));
    assert!(!chat.is_attached());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_fires_while_lines_keep_arriving() {
    let (chat, mock) = attached_chat(Vec::new()).await;
    let feeder = tokio::spawn(async move {
        loop {
            mock.inject_line("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let timeout = Duration::from_millis(200);
    let script = Script::new("silent", vec![ScriptStep::new("$PMTK355*31", Matcher::new("PMTK999"))], timeout);
    let started = std::time::Instant::now();
    let result = chat.run_script(&script).await;
    feeder.abort();

    assert!(matches!(result, Err(ChatError::Timeout { .. })));
    assert!(started.elapsed() < timeout + Duration::from_millis(60), "took {:?}", started.elapsed());
}

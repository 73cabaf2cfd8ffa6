mod common;

use std::time::Duration;

use common::{build, override_reply, powered_device, test_config, SCRIPT_TIMEOUT};
use quectel_lx6::{ErrorKind, GnssApi, GnssSystems, NavigationMode, PowerAction, PowerManaged, SentenceKind};

#[tokio::test]
async fn fix_rate_outside_range_is_rejected_without_io() {
    let (gnss, mock) = powered_device().await;

    for interval in [0, 199, 1001, 5000] {
        let err = gnss.set_fix_rate(interval).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "interval {}", interval);
    }
    assert!(mock.writes().is_empty());

    gnss.set_fix_rate(200).await.expect("lower bound");
    gnss.set_fix_rate(1000).await.expect("upper bound");
}

#[tokio::test]
async fn set_fix_rate_writes_framed_request() {
    let (gnss, mock) = powered_device().await;

    gnss.set_fix_rate(500).await.expect("acknowledged");
    assert_eq!(mock.writes(), vec!["$PMTK220,500*2B"]);
}

#[tokio::test]
async fn failure_status_aborts_before_timeout() {
    let (gnss, mock) = powered_device().await;
    override_reply(&mock, "220", vec!["PMTK001,220,2"]);

    let started = tokio::time::Instant::now();
    let err = gnss.set_fix_rate(500).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(started.elapsed() < SCRIPT_TIMEOUT);
}

#[tokio::test]
async fn wrong_echo_times_out() {
    let (gnss, mock) = powered_device().await;
    override_reply(&mock, "220", vec!["PMTK001,220,3,400"]);

    let err = gnss.set_fix_rate(500).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(gnss.chat_metrics().script_timeouts, 1);

    // The device stays usable after a timeout
    mock.set_responder(quectel_lx6::serial::mock::acknowledge_pmtk);
    gnss.set_fix_rate(500).await.expect("acknowledged");
}

#[tokio::test]
async fn navigation_mode_maps_to_pmtk886() {
    let (gnss, mock) = powered_device().await;

    gnss.set_navigation_mode(NavigationMode::ZeroDynamics).await.expect("stationary");
    gnss.set_navigation_mode(NavigationMode::LowDynamics).await.expect("fitness");
    gnss.set_navigation_mode(NavigationMode::BalancedDynamics).await.expect("normal");
    gnss.set_navigation_mode(NavigationMode::HighDynamics).await.expect("aviation");

    assert_eq!(mock.requests(), vec!["PMTK886,4", "PMTK886,1", "PMTK886,0", "PMTK886,2"]);
    assert_eq!(mock.writes()[2], "$PMTK886,0*28");
}

#[tokio::test]
async fn getters_without_protocol_support_do_no_io() {
    let (gnss, mock) = powered_device().await;

    assert_eq!(gnss.get_fix_rate().await.unwrap_err().kind(), ErrorKind::NotSupported);
    assert_eq!(gnss.get_navigation_mode().await.unwrap_err().kind(), ErrorKind::NotSupported);
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn supported_systems_include_sbas_and_qzss() {
    let (gnss, _mock) = build(test_config());

    let supported = gnss.get_supported_systems().await.expect("static");
    for system in [
        GnssSystems::GPS,
        GnssSystems::GLONASS,
        GnssSystems::GALILEO,
        GnssSystems::BEIDOU,
        GnssSystems::QZSS,
        GnssSystems::SBAS,
    ] {
        assert!(supported.contains(system), "{}", system);
    }
    assert!(!supported.contains(GnssSystems::IRNSS));
}

#[tokio::test]
async fn enabled_systems_outside_configurable_set_are_rejected() {
    let (gnss, mock) = powered_device().await;

    for systems in [
        GnssSystems::GPS | GnssSystems::SBAS,
        GnssSystems::QZSS,
        GnssSystems::GPS | GnssSystems::IRNSS,
    ] {
        let err = gnss.set_enabled_systems(systems).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn set_enabled_systems_chains_search_mode_and_sbas() {
    let (gnss, mock) = powered_device().await;

    gnss.set_enabled_systems(GnssSystems::GPS | GnssSystems::GLONASS).await.expect("acknowledged");
    assert_eq!(mock.writes(), vec!["$PMTK353,1,1,0,0,0*2B", "$PMTK313,0*2F"]);
}

#[tokio::test]
async fn set_enabled_systems_stops_on_first_failure() {
    let (gnss, mock) = powered_device().await;
    override_reply(&mock, "353", vec!["PMTK001,353,1"]);

    let err = gnss.set_enabled_systems(GnssSystems::GPS).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(mock.requests(), vec!["PMTK353,1,0,0,0,0"]);
}

#[tokio::test]
async fn get_enabled_systems_is_repeatable_and_never_reports_sbas() {
    let (gnss, mock) = powered_device().await;

    let first = gnss.get_enabled_systems().await.expect("first read");
    let second = gnss.get_enabled_systems().await.expect("second read");

    assert_eq!(first, GnssSystems::GPS | GnssSystems::GLONASS);
    assert_eq!(first, second);
    assert!(!first.contains(GnssSystems::SBAS));
    assert_eq!(mock.writes(), vec!["$PMTK355*31", "$PMTK355*31"]);
}

#[tokio::test]
async fn short_search_mode_reply_is_malformed() {
    let (gnss, mock) = powered_device().await;
    override_reply(&mock, "355", vec!["PMTK001,355,3,1,1"]);

    let err = gnss.get_enabled_systems().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_callers_are_serialized() {
    let (gnss, mock) = powered_device().await;
    mock.set_reply_delay(Duration::from_millis(30));

    let a = tokio::spawn({
        let gnss = gnss.clone();
        async move { gnss.set_fix_rate(500).await }
    });
    let b = tokio::spawn({
        let gnss = gnss.clone();
        async move { gnss.set_navigation_mode(NavigationMode::HighDynamics).await }
    });
    let c = tokio::spawn({
        let gnss = gnss.clone();
        async move { gnss.get_enabled_systems().await }
    });

    a.await.expect("join").expect("fix rate");
    b.await.expect("join").expect("navigation mode");
    c.await.expect("join").expect("enabled systems");

    assert_eq!(mock.max_outstanding(), 1);
    assert_eq!(mock.writes().len(), 3);
}

#[tokio::test]
async fn unsolicited_sentences_flow_during_transaction() {
    let (gnss, mock) = powered_device().await;
    let mut sentences = gnss.subscribe_sentences();
    mock.set_reply_delay(Duration::from_millis(100));

    let pending = tokio::spawn({
        let gnss = gnss.clone();
        async move { gnss.set_fix_rate(1000).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    mock.inject_line("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");

    let sentence = tokio::time::timeout(Duration::from_millis(80), sentences.recv())
        .await
        .expect("forwarded before the reply")
        .expect("sentence");
    assert_eq!(sentence.kind, SentenceKind::Gga);
    assert_eq!(sentence.talker, "GP");
    assert_eq!(sentence.line, "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47");

    pending.await.expect("join").expect("fix rate");
}

#[tokio::test]
async fn buffer_overflow_is_an_encoding_error_and_releases_the_lock() {
    let (gnss, mock) = build(quectel_lx6::Lx6Config { pmtk_buffer_size: 8, ..test_config() });

    let err = gnss.set_fix_rate(500).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);

    let again = tokio::time::timeout(Duration::from_secs(1), gnss.set_navigation_mode(NavigationMode::LowDynamics))
        .await
        .expect("lock released");
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Encoding);

    tokio::time::timeout(Duration::from_secs(1), gnss.on_power_action(PowerAction::TurnOn))
        .await
        .expect("lock released")
        .expect("bookkeeping only");
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn transactions_need_a_running_device() {
    let (gnss, mock) = build(test_config());

    let err = gnss.set_fix_rate(500).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(mock.writes().is_empty());
}

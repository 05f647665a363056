use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use equitybot::account::validate_account;
use equitybot::api::{AlpacaClient, AlpacaCredentials};
use equitybot::clock::{ManualSleeper, MarketClock, Sleeper};
use equitybot::execution::{ExecutionOutcome, Executor, MonitorConfig};
use equitybot::ledger::TradeLedger;
use equitybot::scheduler::{CycleOutcome, ScheduleConfig, TradingLoop};
use equitybot::strategy::SmaCrossover;
use equitybot::*;
use mockito::Matcher;
use serde_json::json;

fn client_for(server: &mockito::ServerGuard) -> Arc<AlpacaClient> {
    let credentials = AlpacaCredentials {
        api_key: "test-key".to_string(),
        secret_key: "test-secret".to_string(),
    };
    Arc::new(AlpacaClient::with_base_urls(credentials, server.url(), server.url()).unwrap())
}

// Wednesday 2024-03-13 10:00 EDT
fn market_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 13, 14, 0, 0).unwrap()
}

fn bars_body(closes: &[f64]) -> String {
    let bars: Vec<_> = closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            json!({
                "t": format!("2024-02-{:02}T05:00:00Z", i + 1),
                "o": close,
                "h": close,
                "l": close,
                "c": close,
                "v": 1000
            })
        })
        .collect();
    json!({ "bars": bars, "symbol": "VOO", "next_page_token": null }).to_string()
}

#[tokio::test]
async fn test_e2e_buy_filled_on_first_poll() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut server = mockito::Server::new_async().await;
    let account = server
        .mock("GET", "/v2/account")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"ACTIVE","cash":"2000"}"#)
        .create_async()
        .await;
    let submit = server
        .mock("POST", "/v2/orders")
        .match_body(Matcher::PartialJson(json!({
            "symbol": "VOO",
            "side": "buy",
            "type": "market",
            "time_in_force": "day",
            "notional": "1500.00"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"ord-1","status":"pending_new"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/v2/orders/ord-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"ord-1","status":"filled"}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::new(dir.path().join("logs").join("trade_log.csv"));
    let sleeper = Arc::new(ManualSleeper::starting_at(market_morning()));
    let executor = Executor::new(
        client_for(&server),
        sleeper.clone(),
        ledger.clone(),
        "VOO",
        MonitorConfig::default(),
    );

    let outcome = executor.execute(OrderSide::Buy, 0.75).await.unwrap();

    account.assert_async().await;
    submit.assert_async().await;
    poll.assert_async().await;

    let ExecutionOutcome::Resolved(record) = outcome else {
        panic!("expected the order to resolve");
    };
    assert_eq!(record.amount, 1500.0);
    assert_eq!(record.resolution, Resolution::Filled);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60)]);

    let contents = std::fs::read_to_string(ledger.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "timestamp,symbol,amount,trade_type,side,status");
    assert!(lines[1].ends_with(",VOO,1500.0,NOTIONAL,BUY,FILLED"));
}

#[tokio::test]
async fn test_e2e_notional_submitted_and_recorded_in_cents() {
    let mut server = mockito::Server::new_async().await;
    let _account = server
        .mock("GET", "/v2/account")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"ACTIVE","cash":"1234.57"}"#)
        .create_async()
        .await;
    let submit = server
        .mock("POST", "/v2/orders")
        .match_body(Matcher::PartialJson(json!({ "side": "buy", "notional": "925.93" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"ord-4","status":"filled"}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::new(dir.path().join("trade_log.csv"));
    let executor = Executor::new(
        client_for(&server),
        Arc::new(ManualSleeper::starting_at(market_morning())),
        ledger.clone(),
        "VOO",
        MonitorConfig::default(),
    );

    executor.execute(OrderSide::Buy, 0.75).await.unwrap();

    submit.assert_async().await;
    let contents = std::fs::read_to_string(ledger.path()).unwrap();
    assert!(contents.lines().nth(1).unwrap().contains(",VOO,925.93,NOTIONAL,BUY,FILLED"));
}

#[tokio::test]
async fn test_e2e_unfilled_sell_is_cancelled() {
    let mut server = mockito::Server::new_async().await;
    let _position = server
        .mock("GET", "/v2/positions/VOO")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"symbol":"VOO","qty":"10","side":"long"}"#)
        .create_async()
        .await;
    let _submit = server
        .mock("POST", "/v2/orders")
        .match_body(Matcher::PartialJson(json!({ "side": "sell", "qty": "1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"ord-2","status":"new"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/v2/orders/ord-2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"ord-2","status":"accepted"}"#)
        .expect(2)
        .create_async()
        .await;
    let cancel = server
        .mock("DELETE", "/v2/orders/ord-2")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::new(dir.path().join("trade_log.csv"));
    let sleeper = Arc::new(ManualSleeper::starting_at(market_morning()));
    let executor = Executor::new(
        client_for(&server),
        sleeper.clone(),
        ledger.clone(),
        "VOO",
        MonitorConfig {
            poll_interval: Duration::from_secs(60),
            max_wait: Duration::from_secs(120),
        },
    );

    executor.execute(OrderSide::Sell, 0.10).await.unwrap();

    poll.assert_async().await;
    cancel.assert_async().await;

    let records = ledger.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].resolution, Resolution::Cancelled);
    assert_eq!(records[0].trade_type, TradeType::Fractional);
    assert_eq!(records[0].amount, 1.0);
    assert_eq!(records[0].timestamp, sleeper.now());
}

#[tokio::test]
async fn test_e2e_validation_reports_every_reason() {
    let mut server = mockito::Server::new_async().await;
    let _account = server
        .mock("GET", "/v2/account")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"ACCOUNT_CLOSED","cash":"-5.00"}"#)
        .create_async()
        .await;
    let _configurations = server
        .mock("GET", "/v2/account/configurations")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"fractional_trading":false}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = validate_account(client.as_ref(), 100.0).await.unwrap_err();

    let ValidationError::Account(reasons) = &err else {
        panic!("expected account validation failure, got {:?}", err);
    };
    assert_eq!(reasons.len(), 3);

    let message = err.to_string();
    assert!(message.starts_with("Account validation failed:"));
    assert_eq!(message.matches("\n- ").count(), 3);
}

#[tokio::test]
async fn test_e2e_full_cycle_buys_on_crossover() {
    let mut server = mockito::Server::new_async().await;
    let cancel_all = server
        .mock("DELETE", "/v2/orders")
        .with_status(207)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;
    let _long = server
        .mock("GET", "/v2/stocks/VOO/bars")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("timeframe".into(), "1Day".into()),
            Matcher::UrlEncoded("limit".into(), "20".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(bars_body(&[400.0; 20]))
        .create_async()
        .await;
    let _short = server
        .mock("GET", "/v2/stocks/VOO/bars")
        .match_query(Matcher::UrlEncoded("limit".into(), "5".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(bars_body(&[410.0, 412.0, 415.0, 411.0, 420.0]))
        .create_async()
        .await;
    let _account = server
        .mock("GET", "/v2/account")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"ACTIVE","cash":"1000"}"#)
        .create_async()
        .await;
    let _submit = server
        .mock("POST", "/v2/orders")
        .match_body(Matcher::PartialJson(json!({ "side": "buy", "notional": "750.00" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"ord-3","status":"filled"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::new(dir.path().join("trade_log.csv"));
    let client = client_for(&server);
    let sleeper = Arc::new(ManualSleeper::starting_at(market_morning()));
    let executor = Executor::new(
        client.clone(),
        sleeper.clone(),
        ledger.clone(),
        "VOO",
        MonitorConfig::default(),
    );
    let trading_loop = TradingLoop::new(
        Box::new(SmaCrossover::default()),
        executor,
        client.clone(),
        client,
        MarketClock::nyse(),
        sleeper.clone(),
        ScheduleConfig::default(),
    );

    let report = trading_loop.run_cycle().await;

    cancel_all.assert_async().await;
    let decision = report.decision.unwrap();
    assert_eq!(decision.side, Some(OrderSide::Buy));
    assert_eq!(decision.multiplier, 0.75);
    assert!(matches!(report.outcome, CycleOutcome::Traded(ref r) if r.amount == 750.0));
    assert_eq!(ledger.read_all().unwrap().len(), 1);
    // Filled at submission, so no polling
    assert_eq!(sleeper.sleep_count(), 0);
}

#[tokio::test]
async fn test_e2e_cycle_skipped_without_bars() {
    let mut server = mockito::Server::new_async().await;
    let _cancel_all = server
        .mock("DELETE", "/v2/orders")
        .with_status(207)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;
    let _bars = server
        .mock("GET", "/v2/stocks/VOO/bars")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"bars":null,"symbol":"VOO","next_page_token":null}"#)
        .create_async()
        .await;
    let submit = server
        .mock("POST", "/v2/orders")
        .expect(0)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::new(dir.path().join("trade_log.csv"));
    let client = client_for(&server);
    let sleeper = Arc::new(ManualSleeper::starting_at(market_morning()));
    let executor = Executor::new(
        client.clone(),
        sleeper.clone(),
        ledger.clone(),
        "VOO",
        MonitorConfig::default(),
    );
    let trading_loop = TradingLoop::new(
        Box::new(SmaCrossover::default()),
        executor,
        client.clone(),
        client,
        MarketClock::nyse(),
        sleeper,
        ScheduleConfig::default(),
    );

    let report = trading_loop.run_cycle().await;

    submit.assert_async().await;
    assert!(matches!(report.outcome, CycleOutcome::Skipped(_)));
    assert!(!ledger.path().exists());
}

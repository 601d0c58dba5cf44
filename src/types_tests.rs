//! Tests for core types

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_parse_aliases() {
        assert_eq!(Direction::parse("BULL"), Some(Direction::Up));
        assert_eq!(Direction::parse("up"), Some(Direction::Up));
        assert_eq!(Direction::parse("BUY_UP"), Some(Direction::Up));
        assert_eq!(Direction::parse("long"), Some(Direction::Up));
        assert_eq!(Direction::parse("BEAR"), Some(Direction::Down));
        assert_eq!(Direction::parse("Down"), Some(Direction::Down));
        assert_eq!(Direction::parse("short"), Some(Direction::Down));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::parse(""), None);
    }

    #[test]
    fn test_webhook_signal_direction_prefers_signal_field() {
        let sig: WebhookSignal = serde_json::from_str(
            r#"{"signal": "BULL", "side": "BEAR"}"#,
        )
        .unwrap();
        assert_eq!(sig.direction(), Some(Direction::Up));
    }

    #[test]
    fn test_webhook_signal_falls_back_to_side() {
        let sig: WebhookSignal = serde_json::from_str(r#"{"side": "BEAR"}"#).unwrap();
        assert_eq!(sig.direction(), Some(Direction::Down));
    }

    #[test]
    fn test_webhook_signal_aliases() {
        let sig: WebhookSignal = serde_json::from_str(
            r#"{"signal": "UP", "barTime": 1700000000000, "windowEndMs": 1700000900000}"#,
        )
        .unwrap();
        assert_eq!(sig.bar_time, Some(1_700_000_000_000));
        assert_eq!(sig.window_end_ms, Some(1_700_000_900_000));
    }

    #[test]
    fn test_trade_status_open() {
        assert!(TradeStatus::Pending.is_open());
        assert!(TradeStatus::Confirmed.is_open());
        assert!(!TradeStatus::Closed.is_open());
        assert!(!TradeStatus::Timeout.is_open());
        assert!(!TradeStatus::Failed.is_open());
    }

    fn sample_trade(entry: Option<rust_decimal::Decimal>) -> PaperTrade {
        PaperTrade {
            trade_id: "t1".into(),
            market_slug: "btc-updown-15m-1700000000".into(),
            token_id: "tok".into(),
            direction: Direction::Up,
            size: dec!(10),
            entry_price: entry,
            opened_at: Utc::now(),
            window_end: None,
            status: TradeStatus::Pending,
            confidence: Some(5),
            session_id: None,
            signal_id: Some("sig-1".into()),
            bars_elapsed: 0,
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            realized_pnl: None,
        }
    }

    #[test]
    fn test_pnl_long_win() {
        let trade = sample_trade(Some(dec!(0.50)));
        // 20 shares, exit at 0.60 -> +2.00
        assert_eq!(trade.compute_pnl(dec!(0.60)), Some(dec!(2.00)));
    }

    #[test]
    fn test_pnl_long_loss() {
        let trade = sample_trade(Some(dec!(0.50)));
        assert_eq!(trade.compute_pnl(dec!(0.40)), Some(dec!(-2.00)));
    }

    #[test]
    fn test_pnl_requires_entry() {
        let trade = sample_trade(None);
        assert_eq!(trade.compute_pnl(dec!(0.60)), None);
        let zero_entry = sample_trade(Some(dec!(0)));
        assert_eq!(zero_entry.compute_pnl(dec!(0.60)), None);
    }

    #[test]
    fn test_decision_serialization() {
        let d = WebhookDecision::skipped("duplicate_signal", "already processed");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "duplicate_signal");
        assert!(json.get("trade_id").is_none());

        let a = WebhookDecision::accepted("t-123".into());
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["trade_id"], "t-123");
        assert!(json.get("reason").is_none());
    }
}

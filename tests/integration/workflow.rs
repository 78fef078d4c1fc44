//! End-to-end workflow: initial ledger → sync → working ledger →
//! confirmation sheet, then a selected-only resync.

use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

use dextrader::engine::allocator::{AllocationEngine, AllocationOptions};
use dextrader::engine::sync::{BalanceSyncEngine, SyncOptions};
use dextrader::rpc::balance::BalanceSource;
use dextrader::storage::{self, sheet, LedgerPaths, WalletStore};
use dextrader::types::{LoadMode, TraderError, NATIVE_MINT};

use crate::fake_node::FakeNode;

const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

struct Workspace {
    root: PathBuf,
    store: WalletStore,
}

impl Workspace {
    fn new(initial_ledger: &str) -> Self {
        let mut root = std::env::temp_dir();
        root.push(format!("dextrader_it_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();

        let paths = LedgerPaths {
            initial: root.join("wallet_database_initial.csv"),
            working: root.join("wallet_database.csv"),
        };
        std::fs::write(&paths.initial, initial_ledger).unwrap();
        Self {
            store: WalletStore::new(paths),
            root,
        }
    }

    fn sheet_dir(&self) -> PathBuf {
        self.root.join("trade_confirmation")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn ledger() -> String {
    format!(
        "wallet_alias,wallet_address,from_token_address,to_token_address,from_balance,to_balance,lastUpdatedOn,selected\n\
         w1,A1,{NATIVE_MINT},{USDC},,,,yes\n\
         w2,A2,{NATIVE_MINT},{USDC},,,,\n\
         spare,,{NATIVE_MINT},{USDC},,,,\n\
         w3,A3,{USDC},{NATIVE_MINT},,,,\n"
    )
}

fn node() -> Arc<FakeNode> {
    Arc::new(
        FakeNode::new()
            .with_lamports("A1", 100_000_000_000)
            .with_lamports("A2", 50_000_000_000)
            .with_lamports("A3", 1_234_567_890)
            .with_token("A1", USDC, "12.5")
            .with_token("A3", USDC, "250.1234567"),
    )
}

#[tokio::test]
async fn test_sync_then_generate() {
    let ws = Workspace::new(&ledger());
    let node = node();
    let engine = BalanceSyncEngine::new(node.resolver(), SyncOptions::default());

    let records = ws.store.load(LoadMode::UpdateAll).unwrap();
    let report = engine.sync(records).await;
    assert_eq!(report.refreshed, 3);
    assert_eq!(report.without_address, 1);
    assert!(report.skipped.is_empty());
    ws.store.save_working(&report.records).unwrap();

    let saved = ws.store.load_working().unwrap();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[0].from_balance, Some(dec!(100)));
    assert_eq!(saved[0].to_balance, Some(dec!(12.5)));
    assert_eq!(saved[1].to_balance, Some(dec!(0)));
    assert_eq!(saved[2].alias, "spare");
    assert!(saved[2].last_updated_at.is_none());
    assert_eq!(saved[3].from_balance, Some(dec!(250.123457)));
    assert_eq!(saved[3].to_balance, Some(dec!(1.234568)));

    let text = std::fs::read_to_string(ws.store.working_path()).unwrap();
    assert!(text.contains(r#""w1","A1""#));
    assert!(text.contains(r#""100.000000""#));

    let orders_path = ws.root.join("order_table.csv");
    std::fs::write(
        &orders_path,
        format!(
            "from_coin_address,to_coin_address,coin_amount,slippage_pct\n{NATIVE_MINT},{USDC},30,0.5%\n"
        ),
    )
    .unwrap();

    let allocator = AllocationEngine::new(AllocationOptions::default());
    let sheet = allocator
        .generate_from_table(&orders_path, &saved, &ws.sheet_dir())
        .unwrap();

    let aliases: Vec<_> = sheet.rows.iter().map(|r| r.wallet_alias.as_str()).collect();
    assert_eq!(aliases, vec!["w1", "w2", "spare"]);
    assert_eq!(sheet.rows[0].coin_amount, dec!(20));
    assert_eq!(sheet.rows[1].coin_amount, dec!(10));
    assert_eq!(sheet.rows[2].coin_amount, dec!(0));
    assert_eq!(sheet.rows[0].pct_display(), "20.00%");
    assert_eq!(sheet::total_amount(&sheet.rows), dec!(30));
    assert_eq!(allocator.latest_sheet(&ws.sheet_dir()).unwrap(), Some(sheet.path));
}

#[tokio::test]
async fn test_oversized_order_writes_no_sheet() {
    let ws = Workspace::new(&ledger());
    let engine = BalanceSyncEngine::new(node().resolver(), SyncOptions::default());
    let report = engine.sync(ws.store.load(LoadMode::UpdateAll).unwrap()).await;

    let orders_path = ws.root.join("order_table.csv");
    std::fs::write(
        &orders_path,
        format!("from_coin_address,to_coin_address,coin_amount,slippage_pct\n{NATIVE_MINT},{USDC},200,1\n"),
    )
    .unwrap();

    let allocator = AllocationEngine::new(AllocationOptions::default());
    let err = allocator
        .generate_from_table(&orders_path, &report.records, &ws.sheet_dir())
        .unwrap_err();
    assert!(matches!(err, TraderError::InsufficientBalance { .. }));
    assert!(err.to_string().contains("150"));
    assert!(allocator.latest_sheet(&ws.sheet_dir()).unwrap().is_none());
}

#[tokio::test]
async fn test_selected_resync_keeps_other_rows() {
    let ws = Workspace::new(&ledger());
    let engine = BalanceSyncEngine::new(node().resolver(), SyncOptions::default());
    let full = engine.sync(ws.store.load(LoadMode::UpdateAll).unwrap()).await;
    ws.store.save_working(&full.records).unwrap();

    // A1 now holds more SOL; only w1 is selected.
    let moved = Arc::new(
        FakeNode::new()
            .with_lamports("A1", 7_000_000_000)
            .with_token("A1", USDC, "99"),
    );
    let engine = BalanceSyncEngine::new(moved.resolver(), SyncOptions::default());
    let selected = ws.store.load(LoadMode::UpdateSelected).unwrap();
    assert_eq!(selected.len(), 1);

    let report = engine.sync(selected).await;
    let merged = storage::merge_into(ws.store.load_working().unwrap(), report.records);
    ws.store.save_working(&merged).unwrap();

    let saved = ws.store.load_working().unwrap();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[0].from_balance, Some(dec!(7)));
    assert_eq!(saved[0].to_balance, Some(dec!(99)));
    assert_eq!(saved[1].from_balance, Some(dec!(50)));
    assert_eq!(saved[3].to_balance, Some(dec!(1.234568)));
    assert_eq!(moved.calls().len(), 2);
}

#[tokio::test]
async fn test_unreachable_wallet_is_reported_not_fatal() {
    let ws = Workspace::new(&ledger());
    let node = Arc::new(
        FakeNode::new()
            .with_lamports("A1", 1_000_000_000)
            .with_lamports("A3", 1_000_000_000)
            .with_down("A2"),
    );
    let engine = BalanceSyncEngine::new(node.resolver(), SyncOptions::default());
    let report = engine.sync(ws.store.load(LoadMode::UpdateAll).unwrap()).await;

    assert_eq!(report.records.len(), 4);
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.skipped[0].alias, "w2");
    assert!(report.skipped[0].reason.contains("HTTP 500"));
    assert_eq!(report.records[1].from_balance, None);
    assert!(report.records[1].last_updated_at.is_none());
    assert_eq!(report.records[0].from_balance, Some(dec!(1)));
}

#[tokio::test]
async fn test_resolve_balance_downgrades_failure_to_zero() {
    let node = Arc::new(FakeNode::new().with_down("A9"));
    let resolver = node.resolver();

    let err = resolver.try_resolve_balance("A9", NATIVE_MINT).await;
    tokio_test::assert_err!(err);
    assert_eq!(resolver.resolve_balance("A9", NATIVE_MINT).await, dec!(0));

    // Token lookups are retried before giving up.
    let before = node.calls().len();
    tokio_test::assert_err!(resolver.try_resolve_balance("A9", USDC).await);
    assert_eq!(node.calls().len() - before, 3);
}

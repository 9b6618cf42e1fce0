//! Config loading, defaults and contract configuration store tests

use std::path::PathBuf;

use rec_orchestrator::models::Address;
use rec_orchestrator::{Config, ConfigStore, FileConfigStore, SpenderPolicy};

#[test]
fn test_default_config_values() {
    let config = Config::default();

    assert_eq!(config.ledger.endpoint, "http://localhost:8545");
    assert_eq!(config.ledger.state_file, PathBuf::from("ledger-state.json"));
    assert_eq!(config.contracts.path, PathBuf::from("contractConfig.json"));
    assert_eq!(config.payment.spender, SpenderPolicy::Seller);
    assert_eq!(config.logging.filter, "rec_orchestrator=info");
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
[ledger]
endpoint = "http://ledger.internal:8545"
state_file = "/var/lib/rec/state.json"

[contracts]
path = "/etc/rec/contractConfig.json"

[payment]
spender = "certificate_contract"

[logging]
filter = "rec_orchestrator=debug"
"#;

    let config: Config = toml::from_str(toml_str).expect("valid TOML");

    assert_eq!(config.ledger.endpoint, "http://ledger.internal:8545");
    assert_eq!(config.ledger.state_file, PathBuf::from("/var/lib/rec/state.json"));
    assert_eq!(config.contracts.path, PathBuf::from("/etc/rec/contractConfig.json"));
    assert_eq!(config.payment.spender, SpenderPolicy::CertificateContract);
    assert_eq!(config.logging.filter, "rec_orchestrator=debug");
}

#[test]
fn test_partial_config_keeps_defaults() {
    let toml_str = r#"
[ledger]
endpoint = "http://10.0.0.5:8545"

[payment]
"#;

    let config: Config = toml::from_str(toml_str).expect("valid TOML");

    assert_eq!(config.ledger.endpoint, "http://10.0.0.5:8545");
    assert_eq!(config.ledger.state_file, PathBuf::from("ledger-state.json"));
    assert_eq!(config.payment.spender, SpenderPolicy::Seller);
    assert_eq!(config.logging.filter, "rec_orchestrator=info");
}

#[test]
fn test_unknown_spender_policy_is_rejected() {
    let result: Result<Config, _> = toml::from_str("[payment]\nspender = \"broker\"\n");
    assert!(result.is_err());
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.ledger.endpoint, "http://localhost:8545");
}

#[test]
fn test_load_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec-orchestrator.toml");
    std::fs::write(&path, "[logging]\nfilter = \"warn\"\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.logging.filter, "warn");
}

const CONTRACT_CONFIG: &str = r#"{
    "assetProducingRegistryLogic": "0x00000000000000000000000000000000000000A1",
    "assetConsumingRegistryLogic": "0x00000000000000000000000000000000000000a2",
    "certificateLogic": "0x00000000000000000000000000000000000000a3",
    "originContractLookup": "0x00000000000000000000000000000000000000a4",
    "userLogic": "0x00000000000000000000000000000000000000a5"
}"#;

#[tokio::test]
async fn test_file_store_reads_contract_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contractConfig.json");
    std::fs::write(&path, CONTRACT_CONFIG).unwrap();

    let store = FileConfigStore::open(&path).unwrap();
    let contracts = store.contracts().await.unwrap();

    assert_eq!(
        contracts.asset_producing_registry_logic,
        Address::new("0x00000000000000000000000000000000000000a1")
    );
    assert_eq!(
        contracts.origin_contract_lookup,
        Address::new("0x00000000000000000000000000000000000000a4")
    );
    assert_eq!(contracts.erc20_address, None);
    assert!(contracts.extra.contains_key("userLogic"));
}

#[tokio::test]
async fn test_file_store_persists_settlement_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contractConfig.json");
    std::fs::write(&path, CONTRACT_CONFIG).unwrap();

    let store = FileConfigStore::open(&path).unwrap();
    store
        .persist_settlement_token(&Address::new("0xBEEF"))
        .await
        .unwrap();

    assert_eq!(
        store.contracts().await.unwrap().erc20_address,
        Some(Address::new("0xbeef"))
    );

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["ERC20Address"], "0xbeef");
    assert_eq!(
        written["userLogic"],
        "0x00000000000000000000000000000000000000a5"
    );
    assert_eq!(
        written["certificateLogic"],
        "0x00000000000000000000000000000000000000a3"
    );

    let reopened = FileConfigStore::open(&path).unwrap();
    assert_eq!(
        reopened.contracts().await.unwrap().erc20_address,
        Some(Address::new("0xbeef"))
    );
}

#[test]
fn test_file_store_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = FileConfigStore::open(dir.path().join("missing.json"));
    assert!(result.is_err());
}

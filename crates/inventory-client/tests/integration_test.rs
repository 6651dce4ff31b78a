//! Integration tests for the inventory client
//!
//! These tests require a running inventory service with a synced provider.
//! Set INVENTORY_URL, INVENTORY_TOKEN, PROVIDER_TYPE and PROVIDER_UID to run.

use crds::ProviderType;
use inventory_client::{InventoryClient, SourceAdapter, SourceCredentials, TlsOptions};

fn client() -> InventoryClient {
    let url = std::env::var("INVENTORY_URL")
        .unwrap_or_else(|_| "https://localhost:8443".to_string());
    let token = std::env::var("INVENTORY_TOKEN").ok();
    let tls = TlsOptions {
        insecure_skip_verify: true,
        cacert: None,
    };
    InventoryClient::new(url, token, &tls).expect("Failed to create client")
}

fn provider() -> (ProviderType, String) {
    let provider_type = std::env::var("PROVIDER_TYPE")
        .unwrap_or_else(|_| "vsphere".to_string())
        .parse()
        .expect("PROVIDER_TYPE must be a provider type");
    let uid = std::env::var("PROVIDER_UID")
        .expect("PROVIDER_UID environment variable must be set");
    (provider_type, uid)
}

#[tokio::test]
#[ignore] // Requires running inventory service
async fn test_list_vms() {
    let (provider_type, uid) = provider();
    let adapter = client().adapter(provider_type, uid, "", SourceCredentials::default());

    let vms = adapter.list_vms().await.expect("Failed to list vms");
    println!("Found {} vms", vms.len());
    for vm in &vms {
        assert!(!vm.id.is_empty());
    }
}

#[tokio::test]
#[ignore]
async fn test_list_networks_and_storages() {
    let (provider_type, uid) = provider();
    let adapter = client().adapter(provider_type, uid, "", SourceCredentials::default());

    let networks = adapter.list_networks().await.expect("Failed to list networks");
    let storages = adapter.list_storages().await.expect("Failed to list storages");
    println!("Found {} networks, {} storages", networks.len(), storages.len());
}

#[tokio::test]
#[ignore]
async fn test_vm_references_resolve() {
    let (provider_type, uid) = provider();
    let adapter = client().adapter(provider_type, uid, "", SourceCredentials::default());

    let networks = adapter.list_networks().await.expect("Failed to list networks");
    let vms = adapter.list_vms().await.expect("Failed to list vms");
    for vm in vms {
        for id in vm.network_ids() {
            assert!(
                networks.iter().any(|n| n.id == id),
                "vm {} references unknown network {}",
                vm.name,
                id
            );
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_unknown_provider_is_not_found() {
    let adapter = client().adapter(
        ProviderType::Vsphere,
        "00000000-0000-0000-0000-000000000000",
        "",
        SourceCredentials::default(),
    );
    let err = adapter.list_vms().await.expect_err("listing should fail");
    assert_eq!(err.reason(), "ItemNotFound");
}

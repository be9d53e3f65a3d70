mod common;

use chain_state_sync::config::NodeConfig;
use chain_state_sync::nftstorage::NftStorageClient;
use chain_state_sync::node::NodeServices;
use chain_state_sync::rpc::messages::*;
use chain_state_sync::rpc::{self, FaultKind, RpcClient, RpcError, RpcServer};
use chain_state_sync::storage::Store;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Daemon {
    address: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), RpcError>>,
}

impl Daemon {
    async fn start() -> Self {
        let authority = Arc::new(MockAuthority::new(genesis(vec![])));
        let store = Store::open_temporary().unwrap();
        let config = NodeConfig::new(std::env::temp_dir()).with_chain_id(CHAIN_ID);
        // nothing listens here; metadata fetches fail fast
        let nft_storage =
            NftStorageClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let services = Arc::new(NodeServices::new(store, authority, nft_storage, &config));

        let listener = rpc::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let server = RpcServer::new(services);
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { server.serve(listener, cancel).await }
        });
        Self {
            address,
            cancel,
            handle,
        }
    }

    async fn client(&self) -> RpcClient {
        RpcClient::connect(&self.address).await.unwrap()
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn fault(error: RpcError) -> RpcFault {
    match error {
        RpcError::FaultError(fault) => fault,
        other => panic!("expected a fault, got {}", other),
    }
}

#[tokio::test]
async fn account_lifecycle_over_the_socket() {
    let daemon = Daemon::start().await;
    let mut client = daemon.client().await;

    let created = client
        .call(CreateAccountArgs {
            password: "secret".into(),
            label: "main".into(),
        })
        .await
        .unwrap();
    assert_eq!(created.mnemonic.split_whitespace().count(), 12);

    let account = client
        .call(GetAccountArgs {
            address: created.address.clone(),
        })
        .await
        .unwrap()
        .account;
    assert_eq!(account.address.to_string(), created.address);
    assert_eq!(account.balance, 0);

    let listed = client
        .call(AccountListingByLocalWalletsArgs::default())
        .await
        .unwrap();
    assert_eq!(listed.accounts, vec![account]);

    let wallet = client
        .call(ExportWalletArgs {
            address: created.address.clone(),
        })
        .await
        .unwrap()
        .wallet;
    assert_eq!(wallet.label, "main");

    // importing the same wallet again is refused
    let duplicate = client.call(ImportWalletArgs { wallet }).await.unwrap_err();
    assert_eq!(fault(duplicate).kind, FaultKind::AlreadyExists);

    daemon.stop().await;
}

#[tokio::test]
async fn faults_carry_their_kind() {
    let daemon = Daemon::start().await;
    let mut client = daemon.client().await;

    let missing = client
        .call(GetAccountArgs {
            address: addr(0xe).to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(fault(missing).kind, FaultKind::NotFound);

    let invalid = fault(
        client
            .call(GetAccountArgs {
                address: "not-an-address".into(),
            })
            .await
            .unwrap_err(),
    );
    assert_eq!(invalid.kind, FaultKind::Validation);
    assert!(invalid.fields.contains_key("address"));

    let created = client
        .call(CreateAccountArgs {
            password: "secret".into(),
            label: String::new(),
        })
        .await
        .unwrap();
    let broke = fault(
        client
            .call(CoinTransferArgs {
                from: created.address,
                to: addr(0xb).to_string(),
                value: 5,
                data: String::new(),
                credential: CredentialArgs::Password {
                    password: "secret".into(),
                },
            })
            .await
            .unwrap_err(),
    );
    assert_eq!(broke.kind, FaultKind::Validation);
    assert!(broke.fields.contains_key("value"));

    let token = fault(client.call(GetTokenArgs { token_id: 3 }).await.unwrap_err());
    assert_eq!(token.kind, FaultKind::NotFound);

    daemon.stop().await;
}

#[tokio::test]
async fn sync_status_before_any_pass() {
    let daemon = Daemon::start().await;
    let status = daemon
        .client()
        .await
        .call(GetSyncStatusArgs::default())
        .await
        .unwrap();
    assert!(!status.is_synching);
    assert_eq!(status.latest_hash, None);
    assert_eq!(status.latest_block_number, None);
    daemon.stop().await;
}

#[tokio::test]
async fn malformed_lines_get_a_validation_fault() {
    let daemon = Daemon::start().await;
    let stream = TcpStream::connect(&daemon.address).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(b"{\"method\":\"no_such_method\"}\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: RpcResponse = serde_json::from_str(line.trim()).unwrap();
    let RpcResponse::Failure { fault } = response else {
        panic!("expected a failure");
    };
    assert_eq!(fault.kind, FaultKind::Validation);

    // the connection stays usable
    let mut request = serde_json::to_vec(&RpcRequest::from(GetSyncStatusArgs::default())).unwrap();
    request.push(b'\n');
    writer.write_all(&request).await.unwrap();
    line.clear();
    reader.read_line(&mut line).await.unwrap();
    assert!(matches!(
        serde_json::from_str::<RpcResponse>(line.trim()).unwrap(),
        RpcResponse::Success { .. }
    ));

    daemon.stop().await;
}

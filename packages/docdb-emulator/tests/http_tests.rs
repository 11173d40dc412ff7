//! REST client against the emulator's HTTP front end.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use docdb_client::link::{collection_link, database_link, document_link, stored_procedure_link};
use docdb_client::{
    ClientConfig, Document, DocumentStore, FeedOptions, PartitionKey, PartitionKeyDefinition,
    Permission, PermissionMode, QuerySpec, RestClient, StoredProcedure,
};
use docdb_emulator::{
    Emulator, EmulatorConfig, Router, Server, PARTITION_DOCUMENTS, WELL_KNOWN_MASTER_KEY,
};

async fn start() -> (Arc<Emulator>, RestClient) {
    let emulator = Arc::new(Emulator::new(EmulatorConfig::default()).unwrap());
    emulator.provision_database("ToDoList").unwrap();
    emulator
        .provision_collection(
            "ToDoList",
            "Items",
            Some(PartitionKeyDefinition::hash("partition")),
        )
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = Server::new(addr, Router::new(Arc::clone(&emulator)));
    tokio::spawn(server.serve_on(listener));

    let client = RestClient::with_master_key(
        ClientConfig {
            endpoint: format!("http://{}/", addr),
            request_timeout_ms: 5000,
            accept_invalid_certs: false,
        },
        WELL_KNOWN_MASTER_KEY,
    )
    .unwrap();
    (emulator, client)
}

fn doc(partition: &str) -> Document {
    Document::new().with_field("partition", partition)
}

#[tokio::test]
async fn test_master_key_crud_and_paged_queries() {
    let (_emulator, client) = start().await;
    let db = client.read_database("ToDoList").await.unwrap();
    assert_eq!(db.system.link_or(database_link("ToDoList")), "dbs/ToDoList");

    let coll = client
        .read_collection(&database_link("ToDoList"), "Items")
        .await
        .unwrap();
    assert_eq!(coll.partition_key.unwrap().field(), Some("partition"));

    let coll_link = collection_link("ToDoList", "Items");
    let part_b = PartitionKey::from("partB");
    for _ in 0..7 {
        client
            .create_document(&coll_link, doc("partB"), &part_b)
            .await
            .unwrap();
    }
    let part_a = client
        .create_document(&coll_link, doc("partA"), &PartitionKey::from("partA"))
        .await
        .unwrap();

    let paged = FeedOptions {
        max_item_count: Some(3),
        ..FeedOptions::cross_partition()
    };
    let all = client
        .query_documents(&coll_link, &QuerySpec::new("SELECT * FROM root"), &paged)
        .await
        .unwrap();
    assert_eq!(all.len(), 8);

    let by_id = client
        .query_documents(
            &coll_link,
            &QuerySpec::new("SELECT * FROM d WHERE d.id = @id")
                .with_parameter("@id", part_a.id.clone()),
            &FeedOptions::partition("partA"),
        )
        .await
        .unwrap();
    assert_eq!(by_id.len(), 1);

    client
        .delete_document(&part_a.system.self_link, &PartitionKey::from("partA"))
        .await
        .unwrap();
    let err = client
        .delete_document(&part_a.system.self_link, &PartitionKey::from("partA"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_ids_with_reserved_characters_round_trip_through_urls() {
    let (_emulator, client) = start().await;
    let coll_link = collection_link("ToDoList", "Items");
    let partition = PartitionKey::from("partQ");
    let in_partition = FeedOptions::partition("partQ");
    let all = QuerySpec::new("SELECT * FROM root");

    let created = client
        .create_document(
            &coll_link,
            Document::with_id("my doc #1").with_field("partition", "partQ"),
            &partition,
        )
        .await
        .unwrap();
    assert_eq!(created.id, "my doc #1");
    let found = client
        .query_documents(&coll_link, &all, &in_partition)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    client
        .delete_document(&document_link("ToDoList", "Items", "my doc #1"), &partition)
        .await
        .unwrap();
    let left = client
        .query_documents(&coll_link, &all, &in_partition)
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_wrong_master_key_is_rejected() {
    let (_emulator, client) = start().await;
    let wrong = RestClient::with_master_key(client.config().clone(), "c2VjcmV0").unwrap();
    let err = wrong.read_database("ToDoList").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_procedures_and_partition_scoped_tokens_over_http() {
    let (emulator, client) = start().await;
    emulator
        .procedures()
        .register_builtin("getAllDocs", PARTITION_DOCUMENTS)
        .unwrap();

    let coll_link = collection_link("ToDoList", "Items");
    let sproc = client
        .create_stored_procedure(&coll_link, &StoredProcedure::new("getAllDocs", "function () {}"))
        .await
        .unwrap();
    assert_eq!(
        client
            .create_stored_procedure(&coll_link, &StoredProcedure::new("getAllDocs", "x"))
            .await
            .unwrap_err()
            .status(),
        Some(409)
    );

    client
        .create_document(&coll_link, doc("partA"), &PartitionKey::from("partA"))
        .await
        .unwrap();

    let sproc_link = stored_procedure_link("ToDoList", "Items", "getAllDocs");
    let body = client
        .execute_stored_procedure(&sproc_link, &[json!("partA")], &PartitionKey::from("partA"))
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(body.as_str().unwrap()).unwrap();
    assert_eq!(parsed["docs"].as_array().unwrap().len(), 1);

    let user = client
        .create_user(&database_link("ToDoList"), "testuser")
        .await
        .unwrap();
    let part_b = PartitionKey::from("partB");
    client
        .create_permission(
            &user.system.self_link,
            &Permission::new("coll", PermissionMode::All, coll_link.clone()),
            Some(&part_b),
        )
        .await
        .unwrap();
    client
        .create_permission(
            &user.system.self_link,
            &Permission::new("sproc", PermissionMode::All, sproc.system.self_link.clone()),
            Some(&part_b),
        )
        .await
        .unwrap();

    let feed = client.list_permissions(&user.system.self_link).await.unwrap();
    assert_eq!(feed.len(), 2);
    assert!(feed.iter().all(|p| !p.token.is_empty()));

    let restricted = client.with_permission_feed(&feed).unwrap();
    assert!(restricted
        .create_document(&coll_link, doc("partB"), &part_b)
        .await
        .is_ok());
    assert!(restricted
        .create_document(&coll_link, doc("partA"), &PartitionKey::from("partA"))
        .await
        .unwrap_err()
        .is_forbidden());
    assert!(restricted
        .query_documents(
            &coll_link,
            &QuerySpec::new("SELECT * FROM root"),
            &FeedOptions::cross_partition()
        )
        .await
        .unwrap_err()
        .is_forbidden());
    assert!(restricted
        .execute_stored_procedure(&sproc_link, &[json!("partB")], &part_b)
        .await
        .unwrap_err()
        .is_forbidden());
}

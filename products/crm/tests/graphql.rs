mod common;

use std::sync::Arc;

use async_graphql::{Request, Variables, value};
use common::{StubListings, listing, memory_store, setup_db};
use platform_storage::ObjectStore;
use products_crm::{CrmSettings, CurrentUser, build_schema};
use products_listings::ListingSource;
use serde_json::json;
use uuid::Uuid;

async fn schema() -> products_crm::CrmSchema {
    let db = setup_db().await;
    let store: Arc<dyn ObjectStore> = memory_store();
    let listings: Arc<dyn ListingSource> =
        Arc::new(StubListings::with(vec![listing("bbs-1", "Amazon FBA kitchen brand")]));
    build_schema(Arc::new(db), store, listings, CrmSettings::default()).0
}

fn as_user(query: &str, user_id: Uuid) -> Request {
    Request::new(query).data(CurrentUser {
        user_id,
        email: Some("buyer@example.com".into()),
    })
}

fn error_code(response: &async_graphql::Response) -> Option<String> {
    let err = response.errors.first()?;
    let code = err.extensions.as_ref()?.get("code")?;
    match code {
        async_graphql::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn create_then_fetch_over_graphql() {
    let schema = schema().await;
    let user = Uuid::new_v4();
    let create = as_user(
        r#"mutation($input: JSON!) {
            crm { createDeal(input: $input) {
                ignoredFields
                deal { id businessName askingPrice valuationMultiple brokerCompany stage customFields }
            } }
        }"#,
        user,
    )
    .variables(Variables::from_json(json!({
        "input": {
            "name": "Dental SaaS",
            "price": "640,000",
            "multiple": "4x",
            "broker_company": "FE International",
            "employees": 6,
            "shoe_size": 44
        }
    })));
    let response = schema.execute(create).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    let created = &data["crm"]["createDeal"];
    assert_eq!(created["ignoredFields"], json!(["shoe_size"]));
    assert_eq!(created["deal"]["askingPrice"], json!(640000.0));
    assert_eq!(created["deal"]["valuationMultiple"], json!(4.0));
    assert_eq!(created["deal"]["brokerCompany"], json!("FE International"));
    assert_eq!(created["deal"]["stage"], json!("prospecting"));
    assert_eq!(created["deal"]["customFields"], json!({"employees": 6}));
    let id = created["deal"]["id"].as_str().unwrap().to_string();

    let fetch = as_user(
        r#"query($id: ID!) { crm { deal(id: $id) { businessName askingPrice brokerCompany } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "id": id })));
    let response = schema.execute(fetch).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data,
        value!({
            "crm": { "deal": {
                "businessName": "Dental SaaS",
                "askingPrice": 640000.0,
                "brokerCompany": "FE International"
            } }
        })
    );

    let other = as_user(
        r#"query($id: ID!) { crm { deal(id: $id) { id } } }"#,
        Uuid::new_v4(),
    )
    .variables(Variables::from_json(json!({ "id": id })));
    let response = schema.execute(other).await;
    assert_eq!(response.data, value!({ "crm": { "deal": null } }));
}

#[tokio::test]
async fn anonymous_requests_are_rejected() {
    let schema = schema().await;
    let response = schema
        .execute(Request::new("{ crm { deals { id } } }"))
        .await;
    assert_eq!(error_code(&response).as_deref(), Some("UNAUTHENTICATED"));
}

#[tokio::test]
async fn validation_and_not_found_carry_codes() {
    let schema = schema().await;
    let user = Uuid::new_v4();

    let response = schema
        .execute(
            as_user(
                r#"mutation { crm { createDeal(input: {price: "a lot"}) { deal { id } } } }"#,
                user,
            ),
        )
        .await;
    assert_eq!(error_code(&response).as_deref(), Some("VALIDATION"));

    let response = schema
        .execute(as_user(
            r#"mutation { crm { addListingToPipeline(listingId: "missing") { id } } }"#,
            user,
        ))
        .await;
    assert_eq!(error_code(&response).as_deref(), Some("NOT_FOUND"));

    let response = schema
        .execute(as_user(
            r#"query { crm { pipelineBoard(firstPerStage: 500) { totalCount } } }"#,
            user,
        ))
        .await;
    assert_eq!(error_code(&response).as_deref(), Some("VALIDATION"));
}

#[tokio::test]
async fn listing_to_board_to_stage_move() {
    let schema = schema().await;
    let user = Uuid::new_v4();
    let response = schema
        .execute(as_user(
            r#"mutation { crm { addListingToPipeline(listingId: "bbs-1") { id stage } } }"#,
            user,
        ))
        .await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    let id = data["crm"]["addListingToPipeline"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let duplicate = schema
        .execute(as_user(
            r#"mutation { crm { addListingToPipeline(listingId: "bbs-1") { id } } }"#,
            user,
        ))
        .await;
    assert_eq!(error_code(&duplicate).as_deref(), Some("CONFLICT"));

    let move_stage = as_user(
        r#"mutation($id: ID!) { crm { moveDealStage(id: $id, stage: NDA_SIGNED, note: "NDA back") { stage } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "id": id })));
    let response = schema.execute(move_stage).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);

    let board = schema
        .execute(as_user(
            r#"{ crm { pipelineBoard(firstPerStage: 5) {
                totalCount
                columns { stage { key } totalCount deals { businessName } }
            } } }"#,
            user,
        ))
        .await;
    assert!(board.errors.is_empty(), "{:?}", board.errors);
    let data = board.data.into_json().unwrap();
    assert_eq!(data["crm"]["pipelineBoard"]["totalCount"], json!(1));
    let nda = data["crm"]["pipelineBoard"]["columns"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["stage"]["key"] == "nda_signed")
        .unwrap();
    assert_eq!(
        nda["deals"],
        json!([{ "businessName": "Amazon FBA kitchen brand" }])
    );

    let history = as_user(
        r#"query($id: ID!) { crm { dealStageHistory(dealId: $id) { fromStage toStage note } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "id": id })));
    let response = schema.execute(history).await;
    let data = response.data.into_json().unwrap();
    assert_eq!(
        data["crm"]["dealStageHistory"],
        json!([
            { "fromStage": null, "toStage": "PROSPECTING", "note": "Added from listings" },
            { "fromStage": "PROSPECTING", "toStage": "NDA_SIGNED", "note": "NDA back" }
        ])
    );
}

#[tokio::test]
async fn documents_round_trip_through_base64() {
    let schema = schema().await;
    let user = Uuid::new_v4();
    let response = schema
        .execute(as_user(
            r#"mutation { crm { createDeal(input: {name: "Docs"}) { deal { id } } } }"#,
            user,
        ))
        .await;
    let data = response.data.into_json().unwrap();
    let deal_id = data["crm"]["createDeal"]["deal"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let upload = as_user(
        r#"mutation($input: UploadDocumentInput!) {
            crm { uploadDealDocument(input: $input) { id fileName sizeBytes contentType } }
        }"#,
        user,
    )
    .variables(Variables::from_json(json!({
        "input": {
            "dealId": deal_id,
            "fileName": "notes.txt",
            "contentType": "text/plain; charset=utf-8",
            "dataBase64": "aGVsbG8gd29ybGQ="
        }
    })));
    let response = schema.execute(upload).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    let doc = &data["crm"]["uploadDealDocument"];
    assert_eq!(doc["sizeBytes"], json!(11));
    assert_eq!(doc["contentType"], json!("text/plain"));

    let bad = as_user(
        r#"mutation($input: UploadDocumentInput!) { crm { uploadDealDocument(input: $input) { id } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({
        "input": {
            "dealId": deal_id,
            "fileName": "x.txt",
            "contentType": "text/plain",
            "dataBase64": "not base64!!"
        }
    })));
    let response = schema.execute(bad).await;
    assert_eq!(error_code(&response).as_deref(), Some("VALIDATION"));
}

#[tokio::test]
async fn task_status_accepts_workflow_spellings() {
    let schema = schema().await;
    let user = Uuid::new_v4();
    let response = schema
        .execute(as_user(
            r#"mutation { crm { createDeal(input: {name: "Tasks"}) { deal { id } } } }"#,
            user,
        ))
        .await;
    let data = response.data.into_json().unwrap();
    let deal_id = data["crm"]["createDeal"]["deal"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let create = as_user(
        r#"mutation($dealId: ID!) {
            crm { createDealTask(dealId: $dealId, input: {title: "Request P&L", status: "pending"}) {
                id status completedAt
            } }
        }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "dealId": deal_id })));
    let response = schema.execute(create).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    let task = &data["crm"]["createDealTask"];
    assert_eq!(task["status"], json!("TODO"));
    assert_eq!(task["completedAt"], json!(null));
    let task_id = task["id"].as_str().unwrap().to_string();

    let complete = as_user(
        r#"mutation($id: ID!) { crm { moveDealTask(id: $id, status: "completed") { status completedAt } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "id": task_id })));
    let response = schema.execute(complete).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    assert_eq!(data["crm"]["moveDealTask"]["status"], json!("DONE"));
    assert!(data["crm"]["moveDealTask"]["completedAt"].is_string());

    let doing = as_user(
        r#"mutation($id: ID!) { crm { moveDealTask(id: $id, status: "doing") { status completedAt } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "id": task_id })));
    let data = schema.execute(doing).await.data.into_json().unwrap();
    assert_eq!(data["crm"]["moveDealTask"]["status"], json!("IN_PROGRESS"));

    let unknown = as_user(
        r#"mutation($id: ID!) { crm { moveDealTask(id: $id, status: "someday") { status } } }"#,
        user,
    )
    .variables(Variables::from_json(json!({ "id": task_id })));
    let response = schema.execute(unknown).await;
    assert_eq!(error_code(&response).as_deref(), Some("VALIDATION"));
}

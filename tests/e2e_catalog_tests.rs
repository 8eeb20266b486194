//! End-to-end tests for the catalog read API
//!
//! The catalog is seeded by one refresh cycle over the fixture sources.

mod common;

use common::{
    TestClient, TestServer, AUTO_ACCEPTED_COUNT, DARK_KNIGHT_KEY, DEADPOOL_KEY, SEVEN_KEY,
    TOY_STORY_KEY,
};
use reqwest::StatusCode;
use serde_json::Value;

fn keys_of(page: &Value) -> Vec<String> {
    page["entries"]
        .as_array()
        .expect("entries array")
        .iter()
        .map(|e| e["natural_key"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_reports_seeded_catalog() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.get_health().await;
    assert_eq!(response.status(), StatusCode::OK);

    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["catalog_entries"], AUTO_ACCEPTED_COUNT);
    assert_eq!(health["last_completed_cycle"]["triggered_by"], "seed");
}

#[tokio::test]
async fn test_search_without_filters_returns_accepted_entries() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.search("sort=title").await;
    assert_eq!(response.status(), StatusCode::OK);

    let page: Value = response.json().await.unwrap();
    assert_eq!(
        keys_of(&page),
        vec![DEADPOOL_KEY, DARK_KNIGHT_KEY, TOY_STORY_KEY]
    );
    assert_eq!(page["page_info"]["total"], AUTO_ACCEPTED_COUNT);
    assert_eq!(page["page_info"]["has_next"], false);
}

#[tokio::test]
async fn test_content_threshold_excludes_intense_titles() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let page: Value = client.search("violence_max=5").await.json().await.unwrap();
    assert_eq!(keys_of(&page), vec![TOY_STORY_KEY]);

    let page: Value = client
        .search("violence_max=7&language_max=any&sort=year")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(keys_of(&page), vec![DARK_KNIGHT_KEY, TOY_STORY_KEY]);
}

#[tokio::test]
async fn test_traditional_filters_combine_with_content_filters() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let page: Value = client.search("ratings=PG-13,R").await.json().await.unwrap();
    let mut keys = keys_of(&page);
    keys.sort();
    assert_eq!(keys, vec![DARK_KNIGHT_KEY, DEADPOOL_KEY]);

    let page: Value = client
        .search("genres=Action&sex_max=3")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(keys_of(&page), vec![DARK_KNIGHT_KEY]);

    let page: Value = client.search("q=toy").await.json().await.unwrap();
    assert_eq!(keys_of(&page), vec![TOY_STORY_KEY]);
}

#[tokio::test]
async fn test_invalid_filters_are_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    for query in [
        "violence_max=high",
        "sex_max=11",
        "language_max=-1",
        "ratings=X",
        "sort=popularity",
        "per_page=1000",
    ] {
        let response = client.search(query).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "query {} should be rejected",
            query
        );
    }
}

#[tokio::test]
async fn test_pagination() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let first: Value = client
        .search("sort=title&per_page=2&page=1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(keys_of(&first), vec![DEADPOOL_KEY, DARK_KNIGHT_KEY]);
    assert_eq!(first["page_info"]["total_pages"], 2);
    assert_eq!(first["page_info"]["has_next"], true);

    let second: Value = client
        .search("sort=title&per_page=2&page=2")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(keys_of(&second), vec![TOY_STORY_KEY]);
    assert_eq!(second["page_info"]["has_prev"], true);
}

#[tokio::test]
async fn test_entry_detail() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.get_entry(TOY_STORY_KEY).await;
    assert_eq!(response.status(), StatusCode::OK);

    let entry: Value = response.json().await.unwrap();
    assert_eq!(entry["title"], "Toy Story");
    assert_eq!(entry["classification"], "G");
    assert_eq!(entry["content_scores"]["scores"]["violence"], 2);
    assert_eq!(entry["content_scores"]["reviewed"], false);
    assert_eq!(entry["scores_authoritative"], true);
    assert!(entry["score_changes"].as_array().unwrap().is_empty());

    let response = client.get_entry(SEVEN_KEY).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_genres_are_distinct_and_sorted() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let genres: Value = client.get_genres().await.json().await.unwrap();
    assert_eq!(
        genres["genres"],
        serde_json::json!(["Action", "Animation", "Comedy", "Crime", "Drama", "Family"])
    );
}

use super::*;
use axum::{
    extract::{Path as AxumPath, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Duration;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[test]
fn extracts_ids_from_common_link_shapes() {
    let id = Some("dQw4w9WgXcQ".to_string());
    assert_eq!(video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
    assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ"), id);
    assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ?t=42"), id);
    assert_eq!(video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), id);
    assert_eq!(video_id("https://www.youtube.com/v/dQw4w9WgXcQ"), id);
    assert_eq!(
        video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ#t=1"),
        id
    );
    assert_eq!(video_id("https://www.youtube.com/user/x#p/u/1/dQw4w9WgXcQ"), id);
}

#[test]
fn rejects_links_without_an_eleven_character_id() {
    assert_eq!(video_id("https://www.youtube.com/watch?v=short"), None);
    assert_eq!(video_id("https://example.com/nothing-here"), None);
    assert_eq!(video_id(""), None);
}

#[test]
fn builds_thumbnail_urls() {
    assert_eq!(
        thumbnail_url("dQw4w9WgXcQ", ThumbnailQuality::MaxRes),
        "https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"
    );
    assert_eq!(
        thumbnail_url("dQw4w9WgXcQ", ThumbnailQuality::High),
        "https://img.youtube.com/vi/dQw4w9WgXcQ/hqdefault.jpg"
    );
}

#[test]
fn formats_view_counts_compactly() {
    assert_eq!(compact_count(999), "999");
    assert_eq!(compact_count(3_400), "3.4K");
    assert_eq!(compact_count(1_234_567), "1.2M");
}

#[test]
fn formats_relative_publish_times() {
    let now = Utc::now();
    assert_eq!(relative_time(now - Duration::seconds(10), now), "Just now");
    assert_eq!(relative_time(now - Duration::minutes(5), now), "5m ago");
    assert_eq!(relative_time(now - Duration::hours(3), now), "3h ago");
    assert_eq!(relative_time(now - Duration::days(2), now), "2d ago");
    assert_eq!(relative_time(now - Duration::days(8), now), "1w ago");
    assert_eq!(relative_time(now - Duration::days(125), now), "4mo ago");
    assert_eq!(relative_time(now - Duration::days(800), now), "2y ago");
}

#[test]
fn parses_search_order_names() {
    assert_eq!("viewCount".parse::<SearchOrder>(), Ok(SearchOrder::ViewCount));
    assert_eq!("DATE".parse::<SearchOrder>(), Ok(SearchOrder::Date));
    assert!("popular".parse::<SearchOrder>().is_err());
}

#[tokio::test]
async fn falls_back_to_high_quality_thumbnail() {
    let requested = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = requested.clone();
    let app = Router::new().route(
        "/:id/:file",
        get(move |AxumPath((id, file)): AxumPath<(String, String)>| {
            let log = log.clone();
            async move {
                log.lock().expect("lock").push(format!("{id}/{file}"));
                if file == "maxresdefault.jpg" {
                    Err(StatusCode::NOT_FOUND)
                } else {
                    Ok(b"ABC".to_vec())
                }
            }
        }),
    );
    let base = spawn(app).await;

    let fetcher = ThumbnailFetcher::with_cdn_base(Client::new(), base);
    let reference = fetcher
        .fetch_style_reference("https://youtu.be/dQw4w9WgXcQ")
        .await
        .expect("thumbnail");

    assert_eq!(reference.data, "QUJD");
    assert_eq!(reference.mime_type, "image/jpeg");
    assert_eq!(
        *requested.lock().expect("lock"),
        vec![
            "dQw4w9WgXcQ/maxresdefault.jpg".to_string(),
            "dQw4w9WgXcQ/hqdefault.jpg".to_string()
        ]
    );
}

#[tokio::test]
async fn invalid_url_is_rejected_before_any_request() {
    let fetcher = ThumbnailFetcher::with_cdn_base(Client::new(), "http://127.0.0.1:9");
    assert!(matches!(
        fetcher.fetch_style_reference("not a link").await,
        Err(YoutubeError::InvalidUrl)
    ));
}

#[tokio::test]
async fn search_merges_statistics_and_page_token() {
    let seen_query = Arc::new(Mutex::new(HashMap::<String, String>::new()));
    let seen = seen_query.clone();
    let published = (Utc::now() - Duration::hours(3)).to_rfc3339();
    let app = Router::new()
        .route(
            "/search",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let seen = seen.clone();
                let published = published.clone();
                async move {
                    *seen.lock().expect("lock") = params;
                    Json(serde_json::json!({
                        "nextPageToken": "NEXT",
                        "items": [
                            {
                                "id": { "videoId": "aaaaaaaaaaa" },
                                "snippet": {
                                    "title": "First",
                                    "publishedAt": published,
                                    "thumbnails": { "high": { "url": "http://thumbs/a.jpg" } }
                                }
                            },
                            {
                                "id": { "channelId": "skip-me" },
                                "snippet": { "title": "Channel", "publishedAt": published }
                            }
                        ]
                    }))
                }
            }),
        )
        .route(
            "/videos",
            get(|| async {
                Json(serde_json::json!({
                    "items": [{ "id": "aaaaaaaaaaa", "statistics": { "viewCount": "1234567" } }]
                }))
            }),
        );
    let base = spawn(app).await;

    let client = YoutubeSearchClient::with_base_url(Client::new(), Some("key".into()), base);
    let page = client
        .search_videos("rust", Some("PAGE2"), SearchOrder::ViewCount)
        .await
        .expect("search");

    assert_eq!(page.next_page_token.as_deref(), Some("NEXT"));
    assert_eq!(
        page.videos,
        vec![VideoSummary {
            id: "aaaaaaaaaaa".into(),
            title: "First".into(),
            thumbnail: "http://thumbs/a.jpg".into(),
            views: "1.2M views".into(),
            published: "3h ago".into(),
        }]
    );

    let query = seen_query.lock().expect("lock").clone();
    assert_eq!(query.get("order").map(String::as_str), Some("viewCount"));
    assert_eq!(query.get("pageToken").map(String::as_str), Some("PAGE2"));
    assert_eq!(query.get("maxResults").map(String::as_str), Some("6"));
}

#[tokio::test]
async fn search_surfaces_quota_errors() {
    let app = Router::new().route(
        "/search",
        get(|| async {
            (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": { "message": "quota exceeded" } })),
            )
        }),
    );
    let base = spawn(app).await;

    let client = YoutubeSearchClient::with_base_url(Client::new(), Some("key".into()), base);
    let error = client
        .search_videos("rust", None, SearchOrder::Relevance)
        .await
        .expect_err("quota");
    assert_eq!(error.to_string(), "YouTube API 403: quota exceeded");
}

#[tokio::test]
async fn search_requires_api_key() {
    let client = YoutubeSearchClient::with_base_url(Client::new(), Some(" ".into()), "http://x");
    assert!(matches!(
        client.search_videos("rust", None, SearchOrder::Relevance).await,
        Err(YoutubeError::MissingApiKey)
    ));
}

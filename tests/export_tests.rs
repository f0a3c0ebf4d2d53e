use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::Value;

use watermark_export::config::ExportSettings;
use watermark_export::db::{
    create_in_memory_pool, Collection, DbPool, Photo, Watermark, WatermarkConfigRecord,
};
use watermark_export::export::ExportContext;
use watermark_export::fetcher::{FetchError, ImageSource};
use watermark_export::routes::build_app;

const OWNER: &str = "owner-1";
const IDENTITY_HEADER: &str = "x-user-id";
const LOGO_URL: &str = "https://cdn.test/logo.png";

/// Serves canned bytes per URL; anything unknown is a 404.
#[derive(Default)]
struct FakeSource {
    bodies: HashMap<String, Result<Vec<u8>, FetchError>>,
}

impl FakeSource {
    fn with(mut self, url: &str, body: Result<Vec<u8>, FetchError>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.bodies
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 0, 0, 255]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([240, 240, 240]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

fn photo_url(n: usize) -> String {
    format!("https://cdn.test/shoot/IMG_{:03}.jpg", n)
}

struct Fixture {
    pool: DbPool,
    collection: Collection,
    photos: Vec<Photo>,
}

/// Collection with `count` photos, optionally configured with the logo watermark.
async fn fixture(count: usize, configured: bool) -> Fixture {
    let pool = create_in_memory_pool().await.unwrap();
    let collection = Collection::create(&pool, OWNER, "Garden Party").await.unwrap();

    let mut photos = Vec::new();
    for n in 1..=count {
        photos.push(Photo::append(&pool, &collection.id, &photo_url(n)).await.unwrap());
    }

    if configured {
        let watermark = Watermark::create(&pool, OWNER, LOGO_URL).await.unwrap();
        WatermarkConfigRecord {
            collection_id: collection.id.clone(),
            watermark_id: watermark.id,
            position_x: 2.0,
            position_y: 2.0,
            width: 12.0,
            height: 12.0,
            rotation: 0.0,
            updated_at: None,
        }
        .upsert(&pool)
        .await
        .unwrap();
    }

    Fixture {
        pool,
        collection,
        photos,
    }
}

fn serving_everything(count: usize) -> FakeSource {
    let mut source = FakeSource::default().with(LOGO_URL, Ok(png(8, 8)));
    for n in 1..=count {
        source = source.with(&photo_url(n), Ok(jpeg(24, 24)));
    }
    source
}

fn context(pool: DbPool, source: FakeSource, settings: ExportSettings) -> ExportContext {
    ExportContext::new(pool, Arc::new(source), settings)
}

fn fast_settings() -> ExportSettings {
    ExportSettings {
        fetch_max_attempts: 1,
        fetch_timeout: Duration::from_secs(5),
        ..ExportSettings::default()
    }
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

fn zip_names(body: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

fn zip_member(body: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}

#[tokio::test]
async fn test_download_requires_identity() {
    let fx = fixture(2, true).await;
    let app = build_app(
        context(fx.pool, serving_everything(2), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/download?batch=1", fx.collection.id))
        .reply(&app)
        .await;

    assert_eq!(response.status(), 401);
    assert_eq!(json_body(response.body())["error"], "Authentication required");
}

#[tokio::test]
async fn test_foreign_collection_is_not_found() {
    let fx = fixture(2, true).await;
    let app = build_app(
        context(fx.pool, serving_everything(2), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/download?batch=1", fx.collection.id))
        .header(IDENTITY_HEADER, "someone-else")
        .reply(&app)
        .await;

    assert_eq!(response.status(), 404);
    assert_eq!(json_body(response.body())["error"], "Collection not found");
}

#[tokio::test]
async fn test_missing_watermark_config_is_not_found() {
    let fx = fixture(2, false).await;
    let app = build_app(
        context(fx.pool, serving_everything(2), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/download?batch=1", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_batch_out_of_range_names_valid_range() {
    let fx = fixture(45, true).await;
    let app = build_app(
        context(fx.pool, serving_everything(45), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    for batch in ["0", "3"] {
        let response = warp::test::request()
            .method("GET")
            .path(&format!(
                "/collections/{}/download?batch={}",
                fx.collection.id, batch
            ))
            .header(IDENTITY_HEADER, OWNER)
            .reply(&app)
            .await;

        assert_eq!(response.status(), 400);
        let message = json_body(response.body())["error"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(message.contains("Valid range: 1-2"), "{}", message);
    }
}

#[tokio::test]
async fn test_oversized_batch_size_is_rejected() {
    let fx = fixture(3, true).await;
    let app = build_app(
        context(fx.pool, serving_everything(3), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!(
            "/collections/{}/download?batch=1&size=41",
            fx.collection.id
        ))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_batch_download_returns_ordered_archive() {
    let fx = fixture(3, true).await;
    let source = serving_everything(3).with(&photo_url(2), Err(FetchError::Status(500)));
    let app = build_app(
        context(fx.pool, source, fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/download?batch=1", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "application/zip");
    assert_eq!(
        headers["content-disposition"],
        "attachment; filename=\"Garden_Party_batch_1_of_1.zip\""
    );
    assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
    assert_eq!(headers["x-export-succeeded"], "2");
    assert_eq!(headers["x-export-failed"], "1");

    let names = zip_names(response.body());
    assert_eq!(
        names,
        vec!["0001_IMG_001.jpg", "0003_IMG_003.jpg", "processing_report.txt"]
    );

    let report = zip_member(response.body(), "processing_report.txt");
    assert!(report.contains("Collection: Garden Party"));
    assert!(report.contains("Succeeded: 2"));
    assert!(report.contains("Failed: 1"));
    assert!(report.contains(&fx.photos[1].id));
}

#[tokio::test]
async fn test_all_failures_return_error_without_archive() {
    let fx = fixture(2, true).await;
    let source = FakeSource::default().with(LOGO_URL, Ok(png(8, 8)));
    let app = build_app(
        context(fx.pool, source, fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/download?batch=1", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 500);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert!(json_body(response.body())["error"]
        .as_str()
        .unwrap()
        .contains("All 2 photos"));
}

#[tokio::test]
async fn test_unfetchable_watermark_fails_job() {
    let fx = fixture(2, true).await;
    let source = serving_everything(2).with(LOGO_URL, Err(FetchError::Status(503)));
    let app = build_app(
        context(fx.pool, source, fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/download?batch=1", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_chunked_download_echoes_client_total() {
    let fx = fixture(5, true).await;
    let settings = ExportSettings {
        chunk_size: 2,
        ..fast_settings()
    };
    let app = build_app(
        context(fx.pool, serving_everything(5), settings),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!(
            "/collections/{}/chunked-download?chunk=2&totalChunks=7",
            fx.collection.id
        ))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"Garden_Party_chunk_3_of_3.zip\""
    );
    assert_eq!(
        zip_names(response.body()),
        vec!["0005_IMG_005.jpg", "chunk_metadata.json"]
    );

    let metadata: Value =
        serde_json::from_str(&zip_member(response.body(), "chunk_metadata.json")).unwrap();
    assert_eq!(metadata["mode"], "chunk");
    assert_eq!(metadata["pageIndex"], 2);
    assert_eq!(metadata["totalPages"], 3);
    assert_eq!(metadata["clientTotalChunks"], 7);
    assert_eq!(metadata["succeeded"], 1);
}

#[tokio::test]
async fn test_chunk_past_end_is_bad_request() {
    let fx = fixture(5, true).await;
    let app = build_app(
        context(fx.pool, serving_everything(5), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!(
            "/collections/{}/chunked-download?chunk=1&totalChunks=2",
            fx.collection.id
        ))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 400);
    assert!(json_body(response.body())["error"]
        .as_str()
        .unwrap()
        .contains("0-0"));
}

#[tokio::test]
async fn test_size_reports_plan_without_fetching() {
    let fx = fixture(3, true).await;
    // Nothing is served: the plan must not touch images
    let app = build_app(
        context(fx.pool, FakeSource::default(), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}/size", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 200);
    let plan = json_body(response.body());
    assert_eq!(plan["totalPhotos"], 3);
    assert_eq!(plan["totalChunks"], 1);
    assert_eq!(plan["chunkSize"], 50);
    assert_eq!(plan["maxPhotos"], 500);
    assert_eq!(plan["hasWatermarkConfig"], true);
}

#[tokio::test]
async fn test_preview_returns_jpeg_attachment() {
    let fx = fixture(1, true).await;
    let app = build_app(
        context(fx.pool, serving_everything(1), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("GET")
        .path(&format!(
            "/collections/{}/photos/{}/watermarked",
            fx.collection.id, fx.photos[0].id
        ))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"watermarked_0001_IMG_001.jpg\""
    );
    assert_eq!(&response.body()[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_collection_lifecycle_over_http() {
    let pool = create_in_memory_pool().await.unwrap();
    let app = build_app(
        context(pool, FakeSource::default(), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let created = warp::test::request()
        .method("POST")
        .path("/collections")
        .header(IDENTITY_HEADER, OWNER)
        .json(&serde_json::json!({"name": "Launch Night"}))
        .reply(&app)
        .await;
    assert_eq!(created.status(), 201);
    let collection_id = json_body(created.body())["id"]
        .as_str()
        .unwrap()
        .to_string();

    for name in ["a", "b", "c"] {
        let added = warp::test::request()
            .method("POST")
            .path(&format!("/collections/{}/photos", collection_id))
            .header(IDENTITY_HEADER, OWNER)
            .json(&serde_json::json!({"url": format!("https://cdn.test/{}.jpg", name)}))
            .reply(&app)
            .await;
        assert_eq!(added.status(), 201);
    }

    let detail = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}", collection_id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;
    let detail = json_body(detail.body());
    let second_id = detail["photos"][1]["id"].as_str().unwrap().to_string();

    let deleted = warp::test::request()
        .method("DELETE")
        .path(&format!("/collections/{}/photos/{}", collection_id, second_id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;
    assert_eq!(deleted.status(), 200);

    let watermark = warp::test::request()
        .method("POST")
        .path("/watermarks")
        .header(IDENTITY_HEADER, OWNER)
        .json(&serde_json::json!({"url": LOGO_URL}))
        .reply(&app)
        .await;
    assert_eq!(watermark.status(), 201);
    let watermark_id = json_body(watermark.body())["id"]
        .as_str()
        .unwrap()
        .to_string();

    let saved = warp::test::request()
        .method("POST")
        .path(&format!("/collections/{}/watermark", collection_id))
        .header(IDENTITY_HEADER, OWNER)
        .json(&serde_json::json!({
            "watermarkId": watermark_id,
            "position": {"x": 10, "y": 10},
            "dimensions": {"width": 100, "height": 100},
            "rotation": -90
        }))
        .reply(&app)
        .await;
    assert_eq!(saved.status(), 200);
    assert_eq!(json_body(saved.body())["rotation"], 270.0);

    let listing = warp::test::request()
        .method("GET")
        .path("/collections")
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;
    let listing = json_body(listing.body());
    assert_eq!(listing[0]["name"], "Launch Night");
    assert_eq!(listing[0]["photoCount"], 2);
    assert_eq!(listing[0]["hasWatermarkConfig"], true);

    let detail = warp::test::request()
        .method("GET")
        .path(&format!("/collections/{}", collection_id))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;
    let sequences: Vec<i64> = json_body(detail.body())["photos"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["sequence"].as_i64().unwrap())
        .collect();
    assert_eq!(sequences, vec![1, 3]);
}

#[tokio::test]
async fn test_invalid_watermark_geometry_is_bad_request() {
    let fx = fixture(1, true).await;
    let app = build_app(
        context(fx.pool, FakeSource::default(), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/collections/{}/watermark", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .json(&serde_json::json!({
            "watermarkId": "whatever",
            "position": {"x": 0, "y": 0},
            "dimensions": {"width": 0, "height": 10},
            "rotation": 0
        }))
        .reply(&app)
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_oversized_watermark_footprint_is_bad_request() {
    let fx = fixture(1, true).await;
    let stored = WatermarkConfigRecord::find_for_collection(&fx.pool, &fx.collection.id)
        .await
        .unwrap()
        .unwrap();
    let app = build_app(
        context(fx.pool, serving_everything(1), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let response = warp::test::request()
        .method("POST")
        .path(&format!("/collections/{}/watermark", fx.collection.id))
        .header(IDENTITY_HEADER, OWNER)
        .json(&serde_json::json!({
            "watermarkId": stored.watermark_id,
            "position": {"x": 0, "y": 0},
            "dimensions": {"width": 1e7, "height": 1e7},
            "rotation": 0
        }))
        .reply(&app)
        .await;
    assert_eq!(response.status(), 400);

    // The stored config is untouched, so exports keep working
    let preview = warp::test::request()
        .method("GET")
        .path(&format!(
            "/collections/{}/photos/{}/watermarked",
            fx.collection.id, fx.photos[0].id
        ))
        .header(IDENTITY_HEADER, OWNER)
        .reply(&app)
        .await;
    assert_eq!(preview.status(), 200);
}

#[tokio::test]
async fn test_health_endpoints() {
    let pool = create_in_memory_pool().await.unwrap();
    let app = build_app(
        context(pool, FakeSource::default(), fast_settings()),
        IDENTITY_HEADER.to_string(),
    );

    let health = warp::test::request().path("/health").reply(&app).await;
    assert_eq!(health.status(), 200);
    assert_eq!(json_body(health.body())["status"], "healthy");

    let ready = warp::test::request().path("/ready").reply(&app).await;
    assert_eq!(ready.status(), 200);
    let ready = json_body(ready.body());
    assert_eq!(ready["database"], "connected");
    assert_eq!(ready["export"]["batchSize"], 40);
    assert_eq!(ready["export"]["chunkSize"], 50);
    assert_eq!(ready["export"]["maxExportPhotos"], 500);
}

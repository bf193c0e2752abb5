use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use log::info;
use shared::{AnalyzeResponse, DrawingKind, HealthResponse, PatientInfo, ReportSummary};
use std::collections::HashMap;
use std::str::FromStr;
use strum::IntoEnumIterator;
use uuid::Uuid;

use crate::analysis::{AnalysisError, AppContext, UploadedImage, INVALID_PATIENT_MESSAGE};
use crate::error::ApiError;
use crate::report::render_html;
use crate::report::selftest::download_name;
use crate::storage::{ReportStore, StoreError};

const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;
const MAX_FIELDS: usize = 16;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/analyze").route(web::post().to(analyze)))
        .service(web::resource("/api/analyze/{kind}").route(web::post().to(analyze_drawing)))
        .service(web::resource("/api/reports/{report_id}").route(web::get().to(get_report)))
        .service(
            web::resource("/api/reports/{report_id}/download")
                .route(web::get().to(download_report)),
        )
        .service(web::resource("/api/health").route(web::get().to(health)));
}

/// The multipart fields a route accepts. Drawings may carry up to
/// `max_file_bytes` each, text fields up to [`MAX_TEXT_FIELD_BYTES`].
struct ExpectedFields<'a> {
    files: &'a [&'a str],
    texts: &'a [&'a str],
    max_file_bytes: usize,
}

impl ExpectedFields<'_> {
    fn limit(&self, name: &str) -> Option<usize> {
        if self.files.contains(&name) {
            Some(self.max_file_bytes)
        } else if self.texts.contains(&name) {
            Some(MAX_TEXT_FIELD_BYTES)
        } else {
            None
        }
    }

    /// Upper bound on all field bodies of one request, with one text field of
    /// slack for fields that are read and discarded.
    fn total_limit(&self) -> usize {
        self.files.len() * self.max_file_bytes + (self.texts.len() + 1) * MAX_TEXT_FIELD_BYTES
    }
}

/// Buffers the expected multipart fields and discards the rest. The field
/// count, each field body and the request as a whole are bounded.
async fn read_fields(
    mut payload: Multipart,
    expected: &ExpectedFields<'_>,
) -> Result<HashMap<String, UploadedImage>, ApiError> {
    let total_limit = expected.total_limit();
    let mut fields = HashMap::new();
    let mut field_count = 0;
    let mut received = 0;

    while let Some(mut field) = payload.try_next().await? {
        field_count += 1;
        if field_count > MAX_FIELDS {
            return Err(AnalysisError::Validation(format!(
                "Request has more than {} form fields",
                MAX_FIELDS
            ))
            .into());
        }

        let name = field.name().map(str::to_string).unwrap_or_default();
        let limit = expected.limit(&name);
        if limit.is_none() {
            log::debug!("Discarding unexpected form field '{}'", name);
        }
        let content_type = field.content_type().map(|m| m.essence_str().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            received += chunk.len();
            if received > total_limit {
                return Err(AnalysisError::Validation(format!(
                    "Request body exceeds the {} byte limit",
                    total_limit
                ))
                .into());
            }
            let Some(limit) = limit else { continue };
            if bytes.len() + chunk.len() > limit {
                return Err(AnalysisError::Validation(format!(
                    "Field '{}' exceeds the {} byte limit",
                    name, limit
                ))
                .into());
            }
            bytes.extend_from_slice(&chunk);
        }

        if limit.is_some() {
            fields.insert(
                name,
                UploadedImage {
                    bytes,
                    content_type,
                },
            );
        }
    }

    Ok(fields)
}

fn parse_patient(field: Option<UploadedImage>) -> Result<PatientInfo, ApiError> {
    let field = field.ok_or_else(|| AnalysisError::Validation(INVALID_PATIENT_MESSAGE.to_string()))?;
    serde_json::from_slice(&field.bytes).map_err(|e| {
        log::warn!("Unparseable user_info: {}", e);
        ApiError::from(AnalysisError::Validation(INVALID_PATIENT_MESSAGE.to_string()))
    })
}

fn parse_report_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid report id '{}'", raw)))
}

async fn analyze(
    ctx: web::Data<AppContext>,
    store: web::Data<ReportStore>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let expected = ExpectedFields {
        files: &["spiral", "wave"],
        texts: &["user_info"],
        max_file_bytes: ctx.max_upload_bytes(),
    };
    let mut fields = read_fields(payload, &expected).await?;
    let spiral = fields.remove(DrawingKind::Spiral.as_ref());
    let wave = fields.remove(DrawingKind::Wave.as_ref());
    if spiral.is_none() || wave.is_none() {
        return Err(AnalysisError::Validation(
            "Both spiral and wave drawings are required".to_string(),
        )
        .into());
    }
    let patient = parse_patient(fields.remove("user_info"))?;

    let summary = web::block(move || -> Result<ReportSummary, ApiError> {
        let report = ctx.run_self_test(patient, spiral.as_ref(), wave.as_ref())?;
        let html = render_html(&report)?;
        let summary = report.summary();
        store.save(&summary, &html)?;
        Ok(summary)
    })
    .await??;

    info!("Analysis complete for report {}", summary.id);
    Ok(HttpResponse::Ok().json(AnalyzeResponse {
        status: "success".to_string(),
        message: "Analysis complete".to_string(),
        report_id: summary.id,
        report_url: format!("/api/reports/{}/download", summary.id),
        report: summary,
    }))
}

async fn analyze_drawing(
    ctx: web::Data<AppContext>,
    path: web::Path<String>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let raw_kind = path.into_inner();
    let kind = DrawingKind::from_str(&raw_kind)
        .map_err(|_| ApiError::BadRequest(format!("Unknown drawing kind '{}'", raw_kind)))?;

    let expected = ExpectedFields {
        files: &["drawing", kind.as_ref()],
        texts: &[],
        max_file_bytes: ctx.max_upload_bytes(),
    };
    let mut fields = read_fields(payload, &expected).await?;
    let upload = fields
        .remove("drawing")
        .or_else(|| fields.remove(kind.as_ref()))
        .ok_or_else(|| AnalysisError::Validation(format!("Missing '{}' drawing", kind)))?;

    let report = web::block(move || ctx.analyze_drawing(kind, &upload)).await??;
    Ok(HttpResponse::Ok().json(report.summary()))
}

async fn get_report(
    store: web::Data<ReportStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_report_id(&path.into_inner())?;
    let summary = web::block(move || store.load_summary(id)).await??;
    info!("Retrieved report: {}", id);
    Ok(HttpResponse::Ok().json(summary))
}

async fn download_report(
    store: web::Data<ReportStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = parse_report_id(&path.into_inner())?;
    let (summary, html) = web::block(move || -> Result<(ReportSummary, String), StoreError> {
        Ok((store.load_summary(id)?, store.load_html(id)?))
    })
    .await??;

    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(download_name(&summary))],
        })
        .body(html))
}

async fn health(ctx: web::Data<AppContext>) -> HttpResponse {
    let runner = ctx.runner();
    let status = if DrawingKind::iter().all(|kind| runner.is_loaded(kind)) {
        "ok"
    } else {
        "degraded"
    };
    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        models: runner.status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ModelRunner;
    use crate::report::ReportBuilder;
    use crate::testing::{noise_png, solid_png, test_context};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use shared::{DrawingSummary, ErrorResponse, Outcome};

    const BOUNDARY: &str = "spiralscan-test-boundary";
    const USER_INFO: &[u8] = br#"{"name":"Jane Doe","age":"42","gender":"Female"}"#;

    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        content_type: &'a str,
        data: &'a [u8],
    }

    fn file<'a>(name: &'a str, content_type: &'a str, data: &'a [u8]) -> Part<'a> {
        Part {
            name,
            file_name: Some("drawing.png"),
            content_type,
            data,
        }
    }

    fn text<'a>(name: &'a str, data: &'a [u8]) -> Part<'a> {
        Part {
            name,
            file_name: None,
            content_type: "application/json",
            data,
        }
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>]) -> test::TestRequest {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match part.file_name {
                Some(file_name) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, file_name
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
            body.extend_from_slice(part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    macro_rules! app {
        ($ctx:expr, $store:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($ctx))
                    .app_data(web::Data::new($store))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn self_test_is_stored_and_downloadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path()).unwrap();
        let app = app!(test_context(), store);

        let black = solid_png(64, 64, 0);
        let req = multipart_request(
            "/api/analyze",
            &[
                file("spiral", "image/png", &black),
                file("wave", "image/png", &black),
                text("user_info", USER_INFO),
            ],
        ).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: AnalyzeResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "success");
        assert_eq!(body.report.verdict.outcome, Outcome::Positive);
        assert_eq!(body.report.patient.age, 42);
        assert_eq!(
            body.report_url,
            format!("/api/reports/{}/download", body.report_id)
        );

        let req = test::TestRequest::get()
            .uri(&format!("/api/reports/{}", body.report_id))
            .to_request();
        let stored: ReportSummary = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stored, body.report);

        let req = test::TestRequest::get().uri(&body.report_url).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("Parkinsons_Report_Jane_Doe_"));
        let html = test::read_body(resp).await;
        assert!(std::str::from_utf8(&html).unwrap().contains("Early Detection Report"));
    }

    #[actix_web::test]
    async fn self_test_requires_both_drawings() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let black = solid_png(16, 16, 0);
        let req = multipart_request(
            "/api/analyze",
            &[file("spiral", "image/png", &black), text("user_info", USER_INFO)],
        ).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "error");
        assert!(body.message.contains("Both spiral and wave"));
    }

    #[actix_web::test]
    async fn invalid_user_info_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let black = solid_png(16, 16, 0);
        for info in [
            &br#"{"name":"Jane","age":12,"gender":"Female"}"#[..],
            &br#"{"name":"Jane","age":30,"gender":"Robot"}"#[..],
            &b"not json"[..],
        ] {
            let req = multipart_request(
                "/api/analyze",
                &[
                    file("spiral", "image/png", &black),
                    file("wave", "image/png", &black),
                    text("user_info", info),
                ],
            ).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: ErrorResponse = test::read_body_json(resp).await;
            assert_eq!(body.message, INVALID_PATIENT_MESSAGE);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn non_image_upload_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let black = solid_png(16, 16, 0);
        let req = multipart_request(
            "/api/analyze",
            &[
                file("spiral", "text/plain", b"just some text"),
                file("wave", "image/png", &black),
                text("user_info", USER_INFO),
            ],
        ).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(
            test_context().runner().clone(),
            ReportBuilder::default(),
            0.5,
            32,
        );
        let app = app!(ctx, ReportStore::new(dir.path()).unwrap());

        let black = solid_png(128, 128, 0);
        let req = multipart_request("/api/analyze/spiral", &[file("drawing", "image/png", &black)]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(body.message.contains("exceeds"));
    }

    #[actix_web::test]
    async fn drawing_without_file_name_gets_the_upload_limit() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let noise = noise_png(256, 256);
        assert!(noise.len() > MAX_TEXT_FIELD_BYTES);
        let part = Part {
            name: "drawing",
            file_name: None,
            content_type: "image/png",
            data: &noise,
        };
        let req = multipart_request("/api/analyze/spiral", &[part]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn unexpected_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let black = solid_png(16, 16, 0);
        let req = multipart_request(
            "/api/analyze/spiral",
            &[
                text("comment", b"drawn with my left hand"),
                file("drawing", "image/png", &black),
            ],
        )
        .to_request();
        let body: DrawingSummary = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.kind, DrawingKind::Spiral);
    }

    #[actix_web::test]
    async fn field_count_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let black = solid_png(16, 16, 0);
        let mut parts: Vec<Part<'_>> = (0..MAX_FIELDS).map(|_| text("extra", b"")).collect();
        parts.push(file("drawing", "image/png", &black));
        let req = multipart_request("/api/analyze/spiral", &parts).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(body.message.contains("form fields"));
    }

    #[actix_web::test]
    async fn request_body_is_bounded_across_fields() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        // Each filler field is under the upload limit; together they exceed
        // what the route accepts.
        let filler = vec![b'x'; 800 * 1024];
        let black = solid_png(16, 16, 0);
        let req = multipart_request(
            "/api/analyze/spiral",
            &[
                text("filler", &filler),
                text("filler", &filler),
                text("filler", &filler),
                file("drawing", "image/png", &black),
            ],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(body.message.contains("Request body exceeds"));
    }

    #[actix_web::test]
    async fn single_drawing_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let white = solid_png(100, 40, 255);
        let req = multipart_request("/api/analyze/wave", &[file("drawing", "image/png", &white)]).to_request();
        let body: DrawingSummary = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.kind, DrawingKind::Wave);
        assert_eq!(body.predicted_label, "healthy");
        assert_eq!(body.probabilities.len(), 2);

        let req = multipart_request("/api/analyze/circle", &[file("drawing", "image/png", &white)]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn unloaded_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(ModelRunner::empty(), ReportBuilder::default(), 0.5, 1 << 20);
        let app = app!(ctx, ReportStore::new(dir.path()).unwrap());

        let black = solid_png(16, 16, 0);
        let req = multipart_request("/api/analyze/spiral", &[file("drawing", "image/png", &black)]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health.status, "degraded");
        assert!(health.models.is_empty());
    }

    #[actix_web::test]
    async fn report_lookup_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());

        let req = test::TestRequest::get()
            .uri(&format!("/api/reports/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri(&format!("/api/reports/{}/download", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/reports/not-a-uuid").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn health_lists_loaded_models() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(test_context(), ReportStore::new(dir.path()).unwrap());
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.models.len(), 2);
        assert_eq!(health.models[0].kind, DrawingKind::Spiral);
    }
}

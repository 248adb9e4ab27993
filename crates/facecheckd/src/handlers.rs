use crate::engine::{EngineError, EngineHandle};
use crate::page::{self, Page, Verdict};
use actix_web::{web, HttpResponse};
use facecheck_core::{FetchError, ImageFetcher, ImageSlot, ImageSource, JpegImage};
use serde::Deserialize;

/// Shared per-process state.
pub struct AppState {
    pub fetcher: ImageFetcher,
    pub engine: EngineHandle,
}

/// Submitted form. Both fields are required; actix rejects the request
/// with 400 when either is missing.
#[derive(Debug, Deserialize)]
pub struct CheckForm {
    pub url1: String,
    pub url2: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(show_form))
            .route(web::post().to(check)),
    );
}

async fn show_form() -> HttpResponse {
    html(&Page::default())
}

async fn check(state: web::Data<AppState>, form: web::Form<CheckForm>) -> HttpResponse {
    let page = run_check(&state, form.into_inner()).await;
    html(&page)
}

fn html(page: &Page) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(page::render(page))
}

/// fetch → fetch → match → page parameters.
pub async fn run_check(state: &AppState, form: CheckForm) -> Page {
    let first = fetch_logged(&state.fetcher, &form.url1, ImageSlot::First).await;
    let second = fetch_logged(&state.fetcher, &form.url2, ImageSlot::Second).await;

    let (Some(first), Some(second)) = (first, second) else {
        return Page {
            result: Some(Verdict::FetchFailure),
            ..Page::default()
        };
    };

    let verdict = match state.engine.verify(first, second).await {
        Ok(v) if v.verified => Verdict::Match,
        Ok(_) => Verdict::NoMatch,
        Err(e @ EngineError::ChannelClosed) => {
            tracing::error!(error = %e, "verification engine is gone; reporting no match");
            Verdict::NoMatch
        }
        Err(e) => {
            tracing::warn!(error = %e, "verification error; reporting no match");
            Verdict::NoMatch
        }
    };
    tracing::info!(verdict = ?verdict, "check finished");

    Page {
        result: Some(verdict),
        image1_url: Some(form.url1),
        image2_url: Some(form.url2),
    }
}

async fn fetch_logged(fetcher: &ImageFetcher, reference: &str, slot: ImageSlot) -> Option<JpegImage> {
    let (kind, result) = match ImageSource::parse(reference) {
        Ok(source) => (source.kind(), fetcher.fetch_source(&source).await),
        Err(e) => ("invalid", Err(FetchError::from(e))),
    };
    match result {
        Ok(image) => Some(image),
        Err(e) => {
            tracing::warn!(
                %slot,
                source = kind,
                reason = e.reason(),
                error = %e,
                "image fetch failed"
            );
            None
        }
    }
}

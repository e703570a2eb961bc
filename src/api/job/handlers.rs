use actix_web::{
    HttpResponse, get, post,
    web::{Data, Path, ServiceConfig, scope},
};
use actix_web_validator::Json;

use super::dto::{JobStatusResponse, SubmitJobResponse};
use super::models::SubmitJob;
use super::service::{JobService, ServiceError};

#[post("")]
async fn submit_job(
    service: Data<JobService>,
    body: Json<SubmitJob>,
) -> Result<HttpResponse, ServiceError> {
    let job = service.submit(&body.target).await?;
    Ok(HttpResponse::Created().json(SubmitJobResponse::from(&job)))
}

#[get("/{id}")]
async fn job_status(
    service: Data<JobService>,
    path: Path<i64>,
) -> Result<HttpResponse, ServiceError> {
    let job = service.status(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(JobStatusResponse::from(job)))
}

pub fn job_config(config: &mut ServiceConfig) {
    config.service(scope("jobs").service(submit_job).service(job_status));
}

use actix_web::{HttpResponse, Responder, get, post, web};

use super::{ErrorResponse, invalid_argument, not_found};
use crate::manager::{SubmissionManager, SubmitError};
use crate::submission::{NewSubmission, SubmissionId};

#[post("/submissions")]
pub async fn post_submission_handler(
    manager: web::Data<SubmissionManager>,
    body: web::Json<NewSubmission>,
) -> impl Responder {
    match manager.submit(body.into_inner()).await {
        Ok(submission) => HttpResponse::Created().json(submission),
        Err(e @ SubmitError::Invalid(_)) => {
            log::info!("Rejected submission: {e}");
            invalid_argument(e.to_string())
        }
        Err(SubmitError::Storage(e)) => {
            log::error!("Failed to insert submission into database: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::EXTERNAL)
        }
    }
}

#[get("/submissions/{id}")]
pub async fn get_submission_handler(
    manager: web::Data<SubmissionManager>,
    path: web::Path<(SubmissionId,)>,
) -> impl Responder {
    let id = path.into_inner().0;

    match manager.get_by_id(id).await {
        Ok(Some(submission)) => HttpResponse::Ok().json(submission),
        Ok(None) => {
            log::info!("Got nothing with submission id {id} from database");
            not_found(format!("Submission {id} not found."))
        }
        Err(e) => {
            log::error!("Failed to retrieve submission {id} from database: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::EXTERNAL)
        }
    }
}

#[get("/submissions/user/{user_id}")]
pub async fn get_user_submissions_handler(
    manager: web::Data<SubmissionManager>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let user_id = path.into_inner().0;

    match manager.get_by_user(&user_id).await {
        Ok(submissions) => {
            log::info!("Got {} submissions of user {user_id}", submissions.len());
            HttpResponse::Ok().json(submissions)
        }
        Err(e) => {
            log::error!("Failed to retrieve submissions of user {user_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::EXTERNAL)
        }
    }
}

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::aggregator::Aggregator;
use crate::config::ServerConfig;
use crate::manager::SubmissionManager;
use crate::routes::{
    get_submission_handler, get_user_submissions_handler, health_handler, json_error_handler,
    judge0_webhook_handler, post_submission_handler,
};

/// Registers every route on `cfg`; shared with the integration tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(post_submission_handler)
        .service(get_user_submissions_handler)
        .service(get_submission_handler)
        .service(judge0_webhook_handler)
        .service(health_handler);
}

pub fn build_server(
    server_config: ServerConfig,
    manager: Arc<SubmissionManager>,
    aggregator: Arc<Aggregator>,
) -> std::io::Result<Server> {
    let manager = web::Data::from(manager);
    let aggregator = web::Data::from(aggregator);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(manager.clone())
            .app_data(aggregator.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}

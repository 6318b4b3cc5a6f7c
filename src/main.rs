use std::io;

use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use leafscan::handlers::{self, AppState};
use leafscan::{Config, ModelHandle, OnnxClassifier, Pipeline, Preprocessor};

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let config = Config::parse();

    info!("loading model from {}", config.model_path.display());
    let model = match OnnxClassifier::load(&config.model_path) {
        Ok(classifier) => ModelHandle::loaded(classifier),
        Err(e) if config.require_model => {
            error!("{}", e);
            return Err(io::Error::new(io::ErrorKind::Other, e));
        }
        Err(e) => {
            error!("{}", e);
            warn!("serving in degraded mode: /predict will answer 503");
            ModelHandle::unavailable()
        }
    };

    let pipeline = Pipeline::new(model, Preprocessor::new(config.resize_filter.into()))
        .with_decode_limits(config.decode_limits());
    info!(
        "resize filter {:?}, decode limits {:?}",
        pipeline.preprocessor().filter(),
        config.decode_limits()
    );
    let state = web::Data::new(
        AppState::new(pipeline).with_max_upload_bytes(config.max_upload_bytes),
    );

    info!("server running at http://{}:{}", config.host, config.port);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(handlers::cors())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server
        .bind((config.host.as_str(), config.port))?
        .run()
        .await
}

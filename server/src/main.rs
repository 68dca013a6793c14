use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use whiteboard_server::config::Config;
use whiteboard_server::handlers::root;
use whiteboard_server::server::spawn_server;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env()?;
    log::info!("Starting with {:?}", config);

    // sessions live on their own multi-threaded runtime, apart from the
    // single-threaded actix workers that own the sockets
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("whiteboard-shard")
        .enable_all()
        .build()?;
    let hub = spawn_server(&config, runtime.handle());

    let bind_address = config.bind_address.clone();
    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(hub.clone()))
                .configure(root)
        })
        .bind(bind_address.as_str())?
        .run()
        .await
    })?;

    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

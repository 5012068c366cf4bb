use rocket::fairing::{Fairing, Info, Kind};
use rocket::response::stream::{Event, EventStream};
use rocket::serde::{json::Json, Deserialize, Serialize};
use rocket::tokio::select;
use rocket::{get, post, routes, Shutdown, State};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{AppConfig, ConfigPatch};
use crate::controller::DisplayController;
use crate::display::FeedItem;
use crate::models::room_id;

type Controller = Arc<DisplayController>;

/// API Response
#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct ApiResponse {
    status: String,
    message: String,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct SetConfigResponse {
    ok: bool,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
struct IngestionToggle {
    disable: bool,
}

/// Everything the surface needs to paint a full frame.
#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct StatusResponse {
    room: String,
    room_id: String,
    mqtt_connected: bool,
    topic: Option<String>,
    hostname: String,
    incoming_call: bool,
    in_meeting: bool,
    network_online: bool,
    version: &'static str,
}

/// CORS Fairing for Rocket
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        res.set_header(rocket::http::Header::new("Access-Control-Allow-Origin", "*"));
        res.set_header(rocket::http::Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST",
        ));
        res.set_header(rocket::http::Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type",
        ));
    }
}

/// Root handler
#[get("/")]
fn root_handler() -> Json<ApiResponse> {
    Json(ApiResponse {
        status: "success".to_string(),
        message: "Room display is running.".to_string(),
    })
}

#[get("/config")]
async fn get_config(controller: &State<Controller>) -> Json<AppConfig> {
    Json(controller.get_config().await)
}

#[post("/config", data = "<patch>")]
async fn set_config(patch: Json<ConfigPatch>, controller: &State<Controller>) -> Json<SetConfigResponse> {
    let ok = controller.set_config(patch.into_inner()).await;
    Json(SetConfigResponse { ok })
}

#[post("/ingestion", data = "<toggle>")]
async fn toggle_ingestion(toggle: Json<IngestionToggle>, controller: &State<Controller>) -> Json<ApiResponse> {
    controller.disable_ingestion(toggle.disable).await;
    Json(ApiResponse {
        status: "success".to_string(),
        message: if toggle.disable { "disabled" } else { "enabled" }.to_string(),
    })
}

#[get("/status")]
async fn status(controller: &State<Controller>) -> Json<StatusResponse> {
    let config = controller.get_config().await;
    let snapshot = controller.bus().snapshot().await;
    Json(StatusResponse {
        room_id: room_id(&config.room).to_string(),
        room: config.room,
        mqtt_connected: snapshot.mqtt_connected,
        topic: snapshot.topic,
        hostname: snapshot.hostname,
        incoming_call: snapshot.incoming_call,
        in_meeting: snapshot.in_meeting,
        network_online: snapshot.network_online,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Server-sent events, one per forwarded display event. A client that falls
/// behind gets a `snapshot` event with the full state instead.
#[get("/events")]
fn events(controller: &State<Controller>, mut shutdown: Shutdown) -> EventStream![] {
    let mut feed = controller.bus().feed();
    EventStream! {
        loop {
            let item = select! {
                item = feed.next() => match item {
                    Some(item) => item,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield match item {
                FeedItem::Event(event) => Event::json(&event).event(event.name()),
                FeedItem::Snapshot(snapshot) => Event::json(&snapshot).event("snapshot"),
            };
        }
    }
}

pub fn build_rocket(controller: Controller) -> rocket::Rocket<rocket::Build> {
    rocket::build()
        .manage(controller)
        .mount(
            "/",
            routes![
                root_handler,
                get_config,
                set_config,
                toggle_ingestion,
                status,
                events
            ],
        )
        .attach(Cors)
}

/// Run the Rocket server for the display surface.
pub async fn run_rest_server(controller: Controller) {
    match build_rocket(controller).launch().await {
        Ok(_) => info!("REST server stopped."),
        Err(e) => error!("REST server failed: {}", e),
    }
}

mod http;
mod kv;

pub use self::http::{
    Http, HttpError, HttpMethod, HttpRequest, HttpResponse, HttpResult, DEFAULT_TIMEOUT_MS,
    MAX_TIMEOUT_MS,
};
pub use self::kv::{KeyValue, KvError, KvOperation, KvOutput, KvResult};

// Crux's built-in Render capability already does everything we need for
// triggering view updates.
pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

pub type AppHttp = Http<Event>;
pub type AppKv = KeyValue<Event>;
pub type AppRender = Render<Event>;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub http: Http<Event>,
    pub key_value: KeyValue<Event>,
    pub render: Render<Event>,
}

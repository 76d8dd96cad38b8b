#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use webhub_core::Thing;
use webhub_server::{Config, Hub, HubOptions};

pub fn lamp_description() -> Value {
    json!({
        "name": "lamp",
        "description": "A dimmable lamp",
        "properties": {
            "on": {"type": "boolean", "value": false},
            "brightness": {"type": "integer", "minimum": 0, "maximum": 100, "value": 50},
            "serial": {"type": "string", "writable": false, "value": "L-1"}
        },
        "actions": {
            "fade": {"input": {"type": "integer", "minimum": 0}, "output": {"type": "string"}},
            "reset": {},
            "explode": {}
        },
        "events": {
            "overheated": {"type": "number"},
            "clicked": null
        }
    })
}

pub fn hub_with(options: HubOptions) -> (Hub, Arc<Thing>) {
    let hub = Hub::new(options).unwrap();
    let thing = hub.produce(lamp_description()).unwrap();
    hub.expose(Arc::clone(&thing)).unwrap();
    (hub, thing)
}

pub fn hub() -> (Hub, Arc<Thing>) {
    hub_with(HubOptions::new(Config::default()))
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn put_json(uri: &str, body: &str) -> Request<Body> {
    Request::put(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

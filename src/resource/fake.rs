//! Scripted in-memory transport for adapter unit tests

use crate::error::{CloudError, Result};
use crate::openstack::{Service, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Canned reply; the last reply queued for a request repeats forever
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Empty,
    Status(u16),
}

impl Reply {
    fn into_result(self) -> Result<Option<Value>> {
        match self {
            Reply::Json(v) => Ok(Some(v)),
            Reply::Empty => Ok(None),
            Reply::Status(404) => Err(CloudError::Api {
                status: 404,
                message: "not found".to_string(),
            }),
            Reply::Status(status) => Err(CloudError::Api {
                status,
                message: format!("status {}", status),
            }),
        }
    }
}

#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    bodies: Mutex<Vec<(String, Value)>>,
}

fn key(method: &str, service: Service, base_path: &str, id: Option<&str>, sub_path: Option<&str>) -> String {
    let mut key = format!("{} {} {}", method, service, base_path);
    if let Some(id) = id {
        key.push('/');
        key.push_str(id);
    }
    if let Some(sub) = sub_path {
        key.push('/');
        key.push_str(sub);
    }
    key
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for e.g. `"GET volume /volumes/v1"`
    pub fn on(&self, request: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(request.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Bodies POSTed to a request key, in order
    pub fn posted(&self, request: &str) -> Vec<Value> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == request)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn count(&self, request: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == request).count()
    }

    fn reply(&self, key: String) -> Result<Option<Value>> {
        self.calls.lock().unwrap().push(key.clone());
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(&key).unwrap_or_else(|| panic!("unexpected request: {}", key));
        let reply = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        };
        reply.into_result()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_resource(&self, service: Service, base_path: &str, id: Option<&str>) -> Result<Option<Value>> {
        match self.reply(key("GET", service, base_path, id, None)) {
            Err(e) if e.is_not_found() => Ok(None),
            other => other,
        }
    }

    async fn post_resource(
        &self,
        service: Service,
        base_path: &str,
        id: Option<&str>,
        sub_path: Option<&str>,
        body: &Value,
    ) -> Result<Option<Value>> {
        let key = key("POST", service, base_path, id, sub_path);
        self.bodies.lock().unwrap().push((key.clone(), body.clone()));
        self.reply(key)
    }

    async fn delete_resource(
        &self,
        service: Service,
        base_path: &str,
        id: &str,
        sub_path: Option<&str>,
    ) -> Result<()> {
        self.reply(key("DELETE", service, base_path, Some(id), sub_path))
            .map(|_| ())
    }
}

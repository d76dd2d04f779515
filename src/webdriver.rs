//! Minimal synchronous W3C WebDriver client, enough to drive one chat tab:
//! session create/delete, navigation, element search, script execution, and
//! page source. Talks JSON over HTTP to a locally running chromedriver or
//! geckodriver endpoint.

use crate::{Result, VaultError};
use serde_json::{json, Value};
use std::time::Duration;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const COMMAND_TIMEOUT_SECS: u64 = 30;

// DOM errors the scroll loop retries instead of aborting on.
const TRANSIENT_DOM_ERRORS: &[&str] = &["stale element reference", "no such element"];

pub fn is_transient_dom(err: &VaultError) -> bool {
    match err {
        VaultError::WebDriver { error, .. } => {
            TRANSIENT_DOM_ERRORS.iter().any(|name| name == error)
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

impl ElementId {
    /// Wire representation used when passing the element as a script argument.
    pub fn to_arg(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Delete,
}

pub struct Session {
    agent: ureq::Agent,
    endpoint: String,
    session_id: String,
}

impl Session {
    pub fn connect(endpoint: &str) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let mut config = ureq::Agent::config_builder();
        config = config
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(COMMAND_TIMEOUT_SECS)));
        let agent: ureq::Agent = config.build().into();

        let body = json!({ "capabilities": { "alwaysMatch": {} } });
        let value = dispatch(
            &agent,
            &format!("{endpoint}/session"),
            Method::Post,
            Some(body),
        )?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                VaultError::Protocol("session response is missing sessionId".to_string())
            })?
            .to_string();

        Ok(Self {
            agent,
            endpoint,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::Post, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    pub fn current_url(&self) -> Result<String> {
        let value = self.command(Method::Get, "/url", None)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VaultError::Protocol("current URL is not a string".to_string()))
    }

    pub fn page_source(&self) -> Result<String> {
        let value = self.command(Method::Get, "/source", None)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| VaultError::Protocol("page source is not a string".to_string()))
    }

    pub fn find_elements_xpath(&self, xpath: &str) -> Result<Vec<ElementId>> {
        let value = self.command(
            Method::Post,
            "/elements",
            Some(json!({ "using": "xpath", "value": xpath })),
        )?;
        parse_element_list(&value)
            .ok_or_else(|| VaultError::Protocol("element list has an unexpected shape".to_string()))
    }

    pub fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::Post,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
    }

    pub fn execute_on(&self, script: &str, element: &ElementId) -> Result<Value> {
        self.execute(script, vec![element.to_arg()])
    }

    pub fn quit(self) -> Result<()> {
        let url = format!("{}/session/{}", self.endpoint, self.session_id);
        dispatch(&self.agent, &url, Method::Delete, None)?;
        Ok(())
    }

    fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        dispatch(&self.agent, &url, method, body)
    }
}

fn dispatch(agent: &ureq::Agent, url: &str, method: Method, body: Option<Value>) -> Result<Value> {
    let mut response = match method {
        Method::Get => agent.get(url).call()?,
        Method::Delete => agent.delete(url).call()?,
        Method::Post => agent.post(url).send_json(body.unwrap_or_else(|| json!({})))?,
    };
    let status = response.status().as_u16();
    let payload: Value = response.body_mut().read_json()?;
    evaluate_reply(status, payload)
}

/// Unwraps the `value` envelope, converting W3C error payloads into errors.
fn evaluate_reply(status: u16, mut payload: Value) -> Result<Value> {
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if status >= 400 {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(VaultError::WebDriver { error, message });
    }
    Ok(value)
}

fn parse_element_list(value: &Value) -> Option<Vec<ElementId>> {
    let items = value.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let object = item.as_object()?;
        let id = object
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .or_else(|| object.values().find_map(Value::as_str))?;
        out.push(ElementId(id.to_string()));
    }
    Some(out)
}

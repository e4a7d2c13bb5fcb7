// src/graph/testing.rs
// =============================================================================
// In-memory GraphApi used by the unit tests.
//
// Each (actor, relation) pair gets a script of steps. Step N answers the call
// made with cursor "cN" (step 0 answers the first call, with no cursor), and
// every page except the last carries the cursor of the following step.
// Actors marked with hang() never answer at all.
// =============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::client::{GraphApi, PageRequest};
use super::model::{Actor, Page, ProfilePayload, Relation};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub enum Step {
    Page(Vec<String>),
    Fail(String),
}

impl Step {
    pub fn page(handles: &[&str]) -> Self {
        Step::Page(handles.iter().map(|h| h.to_string()).collect())
    }

    pub fn fail(message: &str) -> Self {
        Step::Fail(message.to_string())
    }
}

type Call = (Actor, Relation, Option<String>);

#[derive(Default)]
pub struct ScriptedGraph {
    scripts: HashMap<(Actor, Relation), Vec<Step>>,
    hanging: HashSet<Actor>,
    calls: Mutex<Vec<Call>>,
    limits: Mutex<Vec<u32>>,
}

impl ScriptedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, actor: &str, relation: Relation, steps: Vec<Step>) -> Self {
        self.scripts.insert((actor.to_string(), relation), steps);
        self
    }

    pub fn hang(mut self, actor: &str) -> Self {
        self.hanging.insert(actor.to_string());
        self
    }

    pub fn calls_for(&self, actor: &str, relation: Relation) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, r, _)| a == actor && *r == relation)
            .map(|(_, _, cursor)| cursor.clone())
            .collect()
    }

    pub fn limits_seen(&self) -> Vec<u32> {
        self.limits.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphApi for ScriptedGraph {
    async fn fetch_page(&self, request: PageRequest<'_>) -> Result<Page, ApiError> {
        self.calls.lock().unwrap().push((
            request.actor.to_string(),
            request.relation,
            request.cursor.map(str::to_string),
        ));
        self.limits.lock().unwrap().push(request.limit);

        if self.hanging.contains(request.actor) {
            std::future::pending::<()>().await;
        }

        let Some(steps) = self.scripts.get(&(request.actor.to_string(), request.relation)) else {
            return Ok(Page::default());
        };

        let index = match request.cursor {
            None => 0,
            Some(cursor) => cursor
                .trim_start_matches('c')
                .parse::<usize>()
                .map_err(|_| server_error(request.relation, &format!("unknown cursor {}", cursor)))?,
        };

        match steps.get(index) {
            Some(Step::Page(handles)) => Ok(Page {
                items: handles.iter().map(|h| ProfilePayload::with_handle(h)).collect(),
                cursor: (index + 1 < steps.len()).then(|| format!("c{}", index + 1)),
            }),
            Some(Step::Fail(message)) => Err(server_error(request.relation, message)),
            None => Ok(Page::default()),
        }
    }
}

fn server_error(relation: Relation, message: &str) -> ApiError {
    ApiError::Status {
        status: 500,
        endpoint: relation.endpoint().to_string(),
        body: message.to_string(),
    }
}

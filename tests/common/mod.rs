#![allow(dead_code)]

use assembly_runner::config;
use assembly_runner::controller::JobController;
use assembly_runner::intake;
use assembly_runner::db::{self, Pool};
use assembly_runner::error::RemoteError;
use assembly_runner::intake::BuildRow;
use assembly_runner::model::{BomComponent, ItemStatus, OperationType, QueueItem};
use assembly_runner::remote::model::{
    status, NewParentOrder, ParentOrder, Pick, PickLine, SubOrder, SubOrderLine,
};
use assembly_runner::remote::{RemoteService, Row};
use assembly_runner::session::{Credentials, SessionManager};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, Notify};

pub const FG_PART: i64 = 1000;
pub const COMPONENT_PART: i64 = 2000;
pub const BOM_ID: i64 = 77;
pub const LOCATION: i64 = 5;
pub const PARENT_CLOSED: i64 = 70;

pub async fn setup_pool() -> (TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/queue.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

pub fn settings(batch_size: usize) -> config::Queue {
    config::Queue {
        batch_size,
        ..config::Queue::default()
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        app_name: "assembly-runner".into(),
        app_id: "42".into(),
        username: "svc".into(),
        password: "secret".into(),
    }
}

/// Serials are `S{n}-{k}` for k in 0..count; they live at locations 11/12 alternately.
pub fn serials_for(n: usize, count: usize) -> Vec<String> {
    (0..count).map(|k| format!("S{}-{}", n, k)).collect()
}

pub fn build_row(n: usize) -> BuildRow {
    BuildRow {
        barcode: format!("FG{:05}", n),
        serial_numbers: serials_for(n, 2),
        location_id: LOCATION,
        part_id: FG_PART,
        part_number: "FG-1000".into(),
        bom_id: BOM_ID,
        bom_number: "BOM-77".into(),
        scheduled_for: None,
    }
}

/// A queue item as the executor would see it, without going through the store.
pub fn queue_item(id: i64, operation_type: OperationType, barcode: &str, serials: Vec<String>) -> QueueItem {
    let now = Utc::now();
    let bom_snapshot = match operation_type {
        OperationType::Build => None,
        OperationType::Disassemble => Some(vec![BomComponent {
            part_id: COMPONENT_PART,
            quantity: serials.len() as f64,
            serial_numbers: serials.clone(),
        }]),
    };
    QueueItem {
        id,
        operation_type,
        barcode: barcode.to_string(),
        serial_numbers: serials,
        bom_snapshot,
        location_id: LOCATION,
        part_id: FG_PART,
        part_number: "FG-1000".into(),
        bom_id: BOM_ID,
        bom_number: "BOM-77".into(),
        status: ItemStatus::Pending,
        scheduled_for: None,
        parent_order_number: None,
        sub_order_number: None,
        error_message: None,
        retry_count: 0,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

pub fn controller(pool: &Pool, fake: &FakeRemote, settings: config::Queue) -> Arc<JobController> {
    let remote: Arc<dyn RemoteService> = Arc::new(fake.clone());
    let session = Arc::new(SessionManager::new(pool.clone(), Arc::clone(&remote)));
    Arc::new(JobController::new(pool.clone(), remote, session, settings))
}

/// Queue `count` valid build rows and stock their serials remotely.
pub async fn enqueue_builds(pool: &Pool, fake: &FakeRemote, count: usize) -> Vec<i64> {
    let rows: Vec<BuildRow> = (1..=count).map(build_row).collect();
    for row in &rows {
        fake.stock(&row.serial_numbers).await;
    }
    let report = intake::enqueue_builds(pool, rows).await.unwrap();
    assert!(report.rejected.is_empty());
    report.inserted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 500 from the server.
    Transient,
    /// 422 rejection.
    Validation,
}

impl Failure {
    fn error(self, operation: &'static str) -> RemoteError {
        match self {
            Failure::Transient => RemoteError::Status {
                operation,
                status: 500,
                body: "internal error".into(),
            },
            Failure::Validation => RemoteError::Status {
                operation,
                status: 422,
                body: "rejected".into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeParent {
    pub id: i64,
    pub number: String,
    pub status: i64,
    pub quantity: f64,
    pub location_id: i64,
    pub sub_orders: Vec<i64>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    token: Option<String>,
    parents: BTreeMap<i64, FakeParent>,
    sub_orders: BTreeMap<i64, SubOrder>,
    picks: BTreeMap<i64, Pick>,
    serials: HashMap<String, (i64, i64)>,
    calls: HashMap<&'static str, usize>,
    calls_by_target: HashMap<(&'static str, i64), usize>,
    failures: HashMap<(&'static str, Option<i64>), (Failure, usize)>,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Count the call and consume one injected failure, if any.
    fn enter(&mut self, operation: &'static str, target: Option<i64>) -> Result<(), RemoteError> {
        *self.calls.entry(operation).or_default() += 1;
        if let Some(id) = target {
            *self.calls_by_target.entry((operation, id)).or_default() += 1;
        }
        for key in [(operation, target), (operation, None)] {
            if let Some((failure, remaining)) = self.failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(failure.error(operation));
                }
            }
        }
        Ok(())
    }

    fn parent_by_number(&self, number: &str) -> Option<&FakeParent> {
        self.parents.values().find(|p| p.number == number)
    }
}

/// In-memory stand-in for the ERP with call counting, failure injection and
/// an optional pause inside sub-order completion.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
    gate: Arc<Mutex<Option<(Arc<Notify>, Arc<Notify>)>>>,
    login_delay: Arc<Mutex<Option<std::time::Duration>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register serials of `COMPONENT_PART`, alternating between locations 11 and 12.
    pub async fn stock(&self, serials: &[String]) {
        let mut state = self.state.lock().await;
        for (k, serial) in serials.iter().enumerate() {
            let location = if k % 2 == 0 { 11 } else { 12 };
            state.serials.insert(serial.clone(), (COMPONENT_PART, location));
        }
    }

    pub async fn fail(&self, operation: &'static str, target: Option<i64>, failure: Failure, times: usize) {
        self.state
            .lock()
            .await
            .failures
            .insert((operation, target), (failure, times));
    }

    pub async fn calls(&self, operation: &'static str) -> usize {
        self.state.lock().await.calls.get(operation).copied().unwrap_or(0)
    }

    pub async fn calls_for(&self, operation: &'static str, target: i64) -> usize {
        self.state
            .lock()
            .await
            .calls_by_target
            .get(&(operation, target))
            .copied()
            .unwrap_or(0)
    }

    pub async fn parents(&self) -> Vec<FakeParent> {
        self.state.lock().await.parents.values().cloned().collect()
    }

    pub async fn parent(&self, number: &str) -> Option<FakeParent> {
        self.state.lock().await.parent_by_number(number).cloned()
    }

    pub async fn sub_order(&self, id: i64) -> Option<SubOrder> {
        self.state.lock().await.sub_orders.get(&id).cloned()
    }

    pub async fn pick(&self, sub_order_id: i64) -> Option<Pick> {
        self.state.lock().await.picks.get(&sub_order_id).cloned()
    }

    pub async fn token(&self) -> Option<String> {
        self.state.lock().await.token.clone()
    }

    /// Seed a parent order that exists remotely but has no local rows.
    pub async fn preload_parent(&self, number: &str, status: i64) {
        let mut state = self.state.lock().await;
        let id = state.id();
        state.parents.insert(
            id,
            FakeParent {
                id,
                number: number.to_string(),
                status,
                quantity: 0.0,
                location_id: LOCATION,
                sub_orders: vec![],
            },
        );
    }

    /// Mark a sub-order fulfilled behind the runner's back.
    pub async fn complete_sub_order(&self, id: i64) {
        if let Some(order) = self.state.lock().await.sub_orders.get_mut(&id) {
            order.status = status::SUB_ORDER_FULFILLED;
        }
    }

    /// Hold every `login` for `delay` before answering.
    pub async fn slow_login(&self, delay: std::time::Duration) {
        *self.login_delay.lock().await = Some(delay);
    }

    /// Make the next `save_sub_order` wait until [`release`](Self::release).
    /// The returned notify fires when the call has been entered.
    pub async fn pause_completion(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().await = Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Single-quoted literals in `sql`, with `''` unescaped.
fn literals(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut lit = String::new();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    lit.push('\'');
                    continue;
                }
                break;
            }
            lit.push(c);
        }
        out.push(lit);
    }
    out
}

fn not_found(operation: &'static str, what: String) -> RemoteError {
    RemoteError::NotFound { operation, what }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn login(&self, credentials: &Credentials) -> Result<String, RemoteError> {
        let delay = *self.login_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.enter("login", None)?;
        let token = format!("token-{}-{}", credentials.username, state.calls["login"]);
        state.token = Some(token.clone());
        Ok(token)
    }

    async fn logout(&self) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("logout", None)?;
        state.token = None;
        Ok(())
    }

    async fn set_token(&self, token: Option<String>) {
        self.state.lock().await.token = token;
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("query", None)?;
        let lits = literals(sql);

        if sql.contains("FROM wo") {
            let Some(parent) = state.parent_by_number(&lits[0]) else {
                return Ok(vec![]);
            };
            return Ok(parent
                .sub_orders
                .iter()
                .filter_map(|id| state.sub_orders.get(id))
                .map(|wo| row(json!({ "id": wo.id, "num": wo.number })))
                .collect());
        }
        if sql.contains("FROM serialnum") {
            let with_location = sql.contains("tag.locationId");
            return Ok(lits
                .iter()
                .filter_map(|serial| {
                    let (part, location) = state.serials.get(serial)?;
                    Some(if with_location {
                        row(json!({ "serial": serial, "partId": part, "locationId": location }))
                    } else {
                        row(json!({ "serial": serial, "partId": part }))
                    })
                })
                .collect());
        }
        if sql.contains("LIKE") {
            let prefix = lits[0].trim_end_matches('%').replace("\\_", "_");
            return Ok(state
                .parents
                .values()
                .filter(|p| p.number.starts_with(&prefix))
                .map(|p| row(json!({ "id": p.id, "num": p.number, "status": p.status })))
                .collect());
        }
        Ok(state
            .parent_by_number(&lits[0])
            .map(|p| row(json!({ "id": p.id, "num": p.number, "status": p.status })))
            .into_iter()
            .collect())
    }

    async fn create_parent_order(&self, order: &NewParentOrder) -> Result<ParentOrder, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("create_parent_order", None)?;
        if state.parent_by_number(&order.number).is_some() {
            return Err(RemoteError::Status {
                operation: "create_parent_order",
                status: 409,
                body: format!("{} already exists", order.number),
            });
        }
        let id = state.id();
        state.parents.insert(
            id,
            FakeParent {
                id,
                number: order.number.clone(),
                status: status::PARENT_ENTERED,
                quantity: order.quantity,
                location_id: order.location_id,
                sub_orders: vec![],
            },
        );
        Ok(ParentOrder {
            id,
            number: order.number.clone(),
            status: status::PARENT_ENTERED,
            extra: Map::new(),
        })
    }

    async fn issue_parent_order(&self, parent_id: i64) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("issue_parent_order", Some(parent_id))?;
        let parent = state
            .parents
            .get(&parent_id)
            .cloned()
            .ok_or_else(|| not_found("issue_parent_order", format!("parent {parent_id}")))?;
        let disassembly = parent.number.starts_with("DIS");

        let mut generated = Vec::new();
        for _ in 0..parent.quantity as usize {
            let wo_id = state.id();
            let pick_id = state.id();
            let (finished, component) = (
                SubOrderLine {
                    id: Some(state.id()),
                    part_id: FG_PART,
                    quantity: 1.0,
                    tracking: vec![],
                    extra: Map::new(),
                },
                SubOrderLine {
                    id: Some(state.id()),
                    part_id: COMPONENT_PART,
                    quantity: 2.0,
                    tracking: vec![],
                    extra: Map::new(),
                },
            );
            let pick_part = if disassembly { FG_PART } else { COMPONENT_PART };
            let pick_line = PickLine {
                id: Some(state.id()),
                part_id: pick_part,
                quantity: if disassembly { 1.0 } else { 2.0 },
                location_id: None,
                tracking: vec![],
                extra: Map::new(),
            };
            state.sub_orders.insert(
                wo_id,
                SubOrder {
                    id: wo_id,
                    number: format!("WO-{wo_id}"),
                    status: status::SUB_ORDER_ENTERED,
                    location_id: None,
                    items: vec![finished, component],
                    extra: Map::new(),
                },
            );
            state.picks.insert(
                wo_id,
                Pick {
                    id: pick_id,
                    number: format!("PK-{pick_id}"),
                    status: status::PICK_ENTERED,
                    work_order_id: wo_id,
                    items: vec![pick_line],
                    extra: Map::new(),
                },
            );
            generated.push(wo_id);
        }
        if let Some(parent) = state.parents.get_mut(&parent_id) {
            parent.status = status::PARENT_ISSUED;
            parent.sub_orders = generated;
        }
        Ok(())
    }

    async fn close_short_parent_order(&self, parent_id: i64) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("close_short_parent_order", Some(parent_id))?;
        let parent = state
            .parents
            .get_mut(&parent_id)
            .ok_or_else(|| not_found("close_short_parent_order", format!("parent {parent_id}")))?;
        parent.status = PARENT_CLOSED;
        Ok(())
    }

    async fn delete_parent_order(&self, parent_id: i64) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("delete_parent_order", Some(parent_id))?;
        match state.parents.get(&parent_id) {
            Some(p) if p.status == status::PARENT_ENTERED => {
                state.parents.remove(&parent_id);
                Ok(())
            }
            Some(_) => Err(RemoteError::InvalidRequest(
                "only entered parent orders can be deleted".into(),
            )),
            None => Err(not_found("delete_parent_order", format!("parent {parent_id}"))),
        }
    }

    async fn get_pick(&self, sub_order_id: i64) -> Result<Pick, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("get_pick", Some(sub_order_id))?;
        state
            .picks
            .get(&sub_order_id)
            .cloned()
            .ok_or_else(|| not_found("get_pick", format!("pick for {sub_order_id}")))
    }

    async fn save_pick(&self, pick: &Pick) -> Result<Pick, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("save_pick", Some(pick.work_order_id))?;
        state.picks.insert(pick.work_order_id, pick.clone());
        Ok(pick.clone())
    }

    async fn get_sub_order(&self, sub_order_id: i64) -> Result<SubOrder, RemoteError> {
        let mut state = self.state.lock().await;
        state.enter("get_sub_order", Some(sub_order_id))?;
        state
            .sub_orders
            .get(&sub_order_id)
            .cloned()
            .ok_or_else(|| not_found("get_sub_order", format!("sub-order {sub_order_id}")))
    }

    async fn save_sub_order(&self, sub_order: &SubOrder) -> Result<SubOrder, RemoteError> {
        let gate = self.gate.lock().await.take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        let mut state = self.state.lock().await;
        state.enter("save_sub_order", Some(sub_order.id))?;
        state.sub_orders.insert(sub_order.id, sub_order.clone());
        Ok(sub_order.clone())
    }
}

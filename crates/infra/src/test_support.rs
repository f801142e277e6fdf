//! Shared fixtures for the crate's tests.

use std::sync::Mutex;

use core::fmt;

use idrepo_core::{Entity, IdentifiedEntity, define_id, impl_identity};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::logging::{LogSeverity, OperationLogger, format_message};
use crate::record::Record;
use crate::session::{InMemoryBackend, InMemoryDatabase, Session};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
}

impl Customer {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl Entity for Customer {}

impl IdentifiedEntity for Customer {
    type Id = i64;

    fn id(&self) -> &i64 {
        &self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Record for Customer {
    const TABLE: &'static str = "customers";
}

impl_identity!(Customer);

define_id!(TicketId, "TicketId");

/// Record with a store-generated UUID key and no display binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
}

impl Entity for Ticket {}

impl IdentifiedEntity for Ticket {
    type Id = TicketId;

    fn id(&self) -> &TicketId {
        &self.id
    }

    fn set_id(&mut self, id: TicketId) {
        self.id = id;
    }
}

impl Record for Ticket {
    const TABLE: &'static str = "tickets";
}

impl_identity!(Ticket);

/// Same key type and table shape as [`Customer`], different entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
}

impl Entity for Supplier {
    const DISPLAY_NAME: Option<&'static str> = Some("{type} {name}");

    fn field_value(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.name.clone()),
            _ => None,
        }
    }
}

impl IdentifiedEntity for Supplier {
    type Id = i64;

    fn id(&self) -> &i64 {
        &self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Record for Supplier {
    const TABLE: &'static str = "suppliers";
}

/// Logger that keeps every formatted record.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    records: Mutex<Vec<(LogSeverity, String)>>,
}

impl CapturingLogger {
    pub fn records(&self) -> Vec<(LogSeverity, String)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl OperationLogger for CapturingLogger {
    fn log(&self, severity: LogSeverity, template: &str, args: &[&dyn fmt::Display]) {
        if let Ok(mut records) = self.records.lock() {
            records.push((severity, format_message(template, args)));
        }
    }
}

pub fn memory_session() -> (InMemoryDatabase, Session<InMemoryBackend>) {
    let db = InMemoryDatabase::new();
    let session = Session::new(InMemoryBackend::new(db.clone()));
    (db, session)
}

pub fn seed(db: &InMemoryDatabase, customers: &[(i64, &str)]) {
    for (id, name) in customers {
        db.put(Customer::TABLE, json!({"id": id, "name": name}))
            .expect("seed customer");
    }
}

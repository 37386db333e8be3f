#![allow(dead_code)]

use memoorm::prelude::*;
use memoorm::{FieldMap, ObjectIdentity};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Entity)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl User {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Entity)]
#[entity(name = "orders")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub total: f64,
}

// ----------------------------------------------------------------------------
// Recording mapper
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Call {
    pub op: &'static str,
    pub type_name: &'static str,
    pub fields: FieldMap,
}

impl Call {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn calls_of(log: &CallLog, op: &str) -> Vec<Call> {
    recorded(log).into_iter().filter(|call| call.op == op).collect()
}

/// Hands out 1, 2, 3... with 0 as the unassigned value.
pub struct SequenceIds {
    next: i64,
}

impl<T: Entity> IdGenerator<T> for SequenceIds {
    fn generate(&mut self, _entity: &T, _conn: &mut dyn Connection) -> Result<EntityId> {
        let id = self.next;
        self.next += 1;
        Ok(EntityId::Int(id))
    }

    fn empty_value(&self) -> EntityId {
        EntityId::Int(0)
    }
}

pub struct RecordingMapper<T> {
    log: CallLog,
    ids: Option<SequenceIds>,
    fail_on: Option<&'static str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> RecordingMapper<T> {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ids: Some(SequenceIds { next: 1 }),
            fail_on: None,
            _marker: PhantomData,
        }
    }

    pub fn without_ids(mut self) -> Self {
        self.ids = None;
        self
    }

    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    fn record(&self, op: &'static str, entity: &T) -> Result<()> {
        self.log.lock()?.push(Call {
            op,
            type_name: T::TYPE_NAME,
            fields: entity.fields(),
        });
        if self.fail_on == Some(op) {
            return Err(OrmError::ConstraintViolation(format!("{} rejected", op)));
        }
        Ok(())
    }
}

impl<T: Entity> DataMapper for RecordingMapper<T> {
    type Entity = T;

    fn add(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<()> {
        self.record("add", entity)
    }

    fn update(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<()> {
        self.record("update", entity)
    }

    fn delete(&mut self, entity: &T, _conn: &mut dyn Connection) -> Result<()> {
        self.record("delete", entity)
    }

    fn get_by_id(&mut self, _id: &EntityId, _conn: &mut dyn Connection) -> Result<Option<T>> {
        Ok(None)
    }

    fn id_generator(&mut self) -> Option<&mut dyn IdGenerator<T>> {
        self.ids
            .as_mut()
            .map(|ids| ids as &mut dyn IdGenerator<T>)
    }
}

// ----------------------------------------------------------------------------
// Scripted connection
// ----------------------------------------------------------------------------

pub type TxLog = Arc<Mutex<Vec<&'static str>>>;

#[derive(Default)]
pub struct ScriptedConnection {
    pub log: TxLog,
    pub fail_begin: bool,
    pub fail_commit: bool,
    active: bool,
}

impl ScriptedConnection {
    pub fn new(log: TxLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }
}

impl Connection for ScriptedConnection {
    fn begin_transaction(&mut self) -> Result<()> {
        self.log.lock()?.push("begin");
        if self.fail_begin {
            return Err(OrmError::ConnectionError("server went away".into()));
        }
        self.active = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.log.lock()?.push("commit");
        if self.fail_commit {
            return Err(OrmError::ConnectionError("commit refused".into()));
        }
        self.active = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.log.lock()?.push("rollback");
        self.active = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.active
    }
}

pub fn tx_log() -> TxLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn tx_events(log: &TxLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

/// Unit of work wired to a scripted connection and recording mappers for
/// `User` and `Order`.
pub fn recording_uow() -> (UnitOfWork, CallLog, TxLog) {
    let calls = call_log();
    let tx = tx_log();
    let mut uow = UnitOfWork::new().with_connection(ScriptedConnection::new(tx.clone()));
    uow.register_data_mapper(RecordingMapper::<User>::new(calls.clone()));
    uow.register_data_mapper(RecordingMapper::<Order>::new(calls.clone()));
    (uow, calls, tx)
}

pub fn identity_of<T: Entity>(handle: EntityRef<T>) -> ObjectIdentity {
    handle.identity()
}

//! Application services.
//!
//! Every operation follows the same shape:
//!
//! ```text
//! request
//!   ↓
//! 1. load the records it touches into a unit of work
//!   ↓
//! 2. let the domain types decide (validation, invariants, derived amounts)
//!   ↓
//! 3. commit every resulting put/delete as one changeset
//! ```
//!
//! Nothing is written when any step fails, and a concurrent writer that got
//! there first turns the commit into a conflict instead of a lost update.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::info;

use pelleterp_core::{AggregateId, Document, DomainError};
use pelleterp_inventory::{Stock, StockId, SupplyId, SupplyStock};
use pelleterp_invoicing::{Invoice, InvoiceId};
use pelleterp_parties::{Client, ClientId, Supplier, SupplierId};
use pelleterp_sales::{Sale, SaleId};
use pelleterp_treasury::{Check, CheckId, Payment, PaymentId};

use crate::config::AppConfig;
use crate::store::{Changeset, PostgresDocumentStore, Store, StoreError};

pub mod checks;
pub mod clients;
pub mod dashboard;
pub mod invoices;
pub mod maintenance;
pub mod payments;
pub mod production;
pub mod sales;
pub mod stock;
pub mod suppliers;
pub mod unique;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Business settings that are not part of any record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Point of sale used to number sale invoices.
    pub point_of_sale: u32,
    /// How close in time two identical sales must be to count as duplicates.
    pub duplicate_window: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            point_of_sale: 1,
            duplicate_window: Duration::minutes(10),
        }
    }
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            point_of_sale: config.point_of_sale,
            duplicate_window: Duration::minutes(config.duplicate_window_minutes),
        }
    }
}

/// Entry point of the application layer.
#[derive(Clone)]
pub struct Services {
    store: Store,
    settings: Settings,
}

impl Services {
    pub fn new(store: Store, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Postgres when `DATABASE_URL` is configured, in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> ServiceResult<Self> {
        let store = match &config.database_url {
            Some(url) => {
                let pg =
                    PostgresDocumentStore::connect(url, config.database_max_connections).await?;
                info!(max_connections = config.database_max_connections, "using postgres document store");
                Store::new(Arc::new(pg))
            }
            None => {
                info!("DATABASE_URL not set; using in-memory document store");
                Store::in_memory()
            }
        };
        Ok(Self::new(store, Settings::from_config(config)))
    }

    pub fn in_memory() -> Self {
        Self::new(Store::in_memory(), Settings::default())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) fn work(&self) -> Work {
        Work::new(self.store.clone(), self.now())
    }

    pub(crate) async fn require<D: Document>(
        &self,
        id: impl Into<AggregateId>,
        what: &str,
    ) -> ServiceResult<D> {
        let id = id.into();
        self.store
            .load::<D>(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("{what} {id}")).into())
    }

    pub(crate) async fn commit_one<D: Document>(&self, doc: D) -> ServiceResult<D> {
        let mut changes = Changeset::new();
        changes.put(&doc)?;
        self.store.commit(changes).await?;
        Ok(committed(doc))
    }
}

/// `doc` as it is stored after a successful commit (one version later).
pub(crate) fn committed<D: Document>(mut doc: D) -> D {
    doc.set_version(doc.version() + 1);
    doc
}

/// Records of one type loaded (or created) during a unit of work.
///
/// Only records handed out mutably (or inserted) are written back.
pub(crate) struct Cache<K, D> {
    docs: BTreeMap<K, D>,
    dirty: BTreeSet<K>,
    removed: Vec<D>,
}

impl<K, D> Cache<K, D>
where
    K: Copy + Ord + Display + Into<AggregateId>,
    D: Document,
{
    fn new() -> Self {
        Self {
            docs: BTreeMap::new(),
            dirty: BTreeSet::new(),
            removed: Vec::new(),
        }
    }

    fn is_removed(&self, id: K) -> bool {
        let key: AggregateId = id.into();
        self.removed.iter().any(|d| d.key() == key)
    }

    /// Load `id` unless already cached. Returns whether the record exists.
    pub(crate) async fn load(&mut self, store: &Store, id: K) -> ServiceResult<bool> {
        if self.docs.contains_key(&id) {
            return Ok(true);
        }
        if self.is_removed(id) {
            return Ok(false);
        }
        match store.load::<D>(id.into()).await? {
            Some(doc) => {
                self.docs.insert(id, doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Like [`Cache::load`], but a missing record is an error.
    pub(crate) async fn require(&mut self, store: &Store, id: K, what: &str) -> ServiceResult<()> {
        if self.load(store, id).await? {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("{what} {id}")).into())
        }
    }

    /// Cache every stored record of this type that is not cached yet.
    pub(crate) async fn load_all(&mut self, store: &Store, key: impl Fn(&D) -> K) -> ServiceResult<()> {
        for doc in store.list::<D>().await? {
            let id = key(&doc);
            if !self.is_removed(id) && !self.docs.contains_key(&id) {
                self.docs.insert(id, doc);
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, id: &K) -> Option<&D> {
        self.docs.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &K) -> Option<&mut D> {
        let doc = self.docs.get_mut(id)?;
        self.dirty.insert(*id);
        Some(doc)
    }

    pub(crate) fn expect_mut(&mut self, id: &K, what: &str) -> ServiceResult<&mut D> {
        match self.docs.get_mut(id) {
            Some(doc) => {
                self.dirty.insert(*id);
                Ok(doc)
            }
            None => Err(DomainError::not_found(format!("{what} {id}")).into()),
        }
    }

    /// Add a record; it is written on commit.
    pub(crate) fn insert(&mut self, id: K, doc: D) {
        self.docs.insert(id, doc);
        self.dirty.insert(id);
    }

    /// Add a loaded record without marking it for write.
    pub(crate) fn track(&mut self, id: K, doc: D) {
        self.docs.insert(id, doc);
    }

    /// Drop the record; it is deleted on commit unless it was never stored.
    pub(crate) fn remove(&mut self, id: &K) -> Option<D> {
        let doc = self.docs.remove(id)?;
        self.dirty.remove(id);
        if doc.version() > 0 {
            self.removed.push(doc.clone());
        }
        Some(doc)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &D> {
        self.docs.values()
    }

    /// All cached records, each marked for write.
    pub(crate) fn map_mut(&mut self) -> &mut BTreeMap<K, D> {
        self.dirty.extend(self.docs.keys().copied());
        &mut self.docs
    }

    fn flush(self, changes: &mut Changeset) -> Result<(), StoreError> {
        for id in &self.dirty {
            if let Some(doc) = self.docs.get(id) {
                changes.put(doc)?;
            }
        }
        for doc in &self.removed {
            changes.delete(doc);
        }
        Ok(())
    }
}

/// Records touched by one operation, committed together.
///
/// Mutable records live in the typed caches; append-only records
/// (movements, production records) and deletes of other collections go
/// straight to `changes`.
pub(crate) struct Work {
    pub store: Store,
    pub now: DateTime<Utc>,
    pub clients: Cache<ClientId, Client>,
    pub suppliers: Cache<SupplierId, Supplier>,
    pub stocks: Cache<StockId, Stock>,
    pub supplies: Cache<SupplyId, SupplyStock>,
    pub sales: Cache<SaleId, Sale>,
    pub invoices: Cache<InvoiceId, Invoice>,
    pub payments: Cache<PaymentId, Payment>,
    pub checks: Cache<CheckId, Check>,
    pub changes: Changeset,
}

impl Work {
    fn new(store: Store, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now,
            clients: Cache::new(),
            suppliers: Cache::new(),
            stocks: Cache::new(),
            supplies: Cache::new(),
            sales: Cache::new(),
            invoices: Cache::new(),
            payments: Cache::new(),
            checks: Cache::new(),
            changes: Changeset::new(),
        }
    }

    pub(crate) fn record<D: Document>(&mut self, doc: &D) -> ServiceResult<()> {
        self.changes.put(doc)?;
        Ok(())
    }

    pub(crate) fn record_all<'a, D: Document>(
        &mut self,
        docs: impl IntoIterator<Item = &'a D>,
    ) -> ServiceResult<()> {
        self.changes.put_all(docs)?;
        Ok(())
    }

    pub(crate) async fn commit(self) -> ServiceResult<()> {
        let Work {
            store,
            clients,
            suppliers,
            stocks,
            supplies,
            sales,
            invoices,
            payments,
            checks,
            mut changes,
            ..
        } = self;
        clients.flush(&mut changes)?;
        suppliers.flush(&mut changes)?;
        stocks.flush(&mut changes)?;
        supplies.flush(&mut changes)?;
        sales.flush(&mut changes)?;
        invoices.flush(&mut changes)?;
        payments.flush(&mut changes)?;
        checks.flush(&mut changes)?;
        store.commit(changes).await?;
        Ok(())
    }
}

/// Inclusive date range filter shared by the list queries.
pub(crate) fn within<T: PartialOrd>(value: T, from: Option<T>, to: Option<T>) -> bool {
    from.is_none_or(|f| value >= f) && to.is_none_or(|t| value <= t)
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::NaiveDate;

    use pelleterp_core::Money;
    use pelleterp_inventory::{NewStock, NewSupply, Unit};
    use pelleterp_parties::{NewClient, NewSupplier, TaxCondition};

    use super::*;

    pub fn services() -> Services {
        Services::in_memory()
    }

    pub fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    pub fn cents(c: i64) -> Money {
        Money::from_cents(c)
    }

    pub async fn client(svc: &Services, name: &str) -> Client {
        svc.create_client(NewClient {
            name: name.to_string(),
            tax_condition: TaxCondition::ResponsableInscripto,
            ..Default::default()
        })
        .await
        .unwrap()
    }

    pub async fn supplier(svc: &Services, name: &str) -> Supplier {
        svc.create_supplier(NewSupplier {
            name: name.to_string(),
            tax_condition: TaxCondition::ResponsableInscripto,
            ..Default::default()
        })
        .await
        .unwrap()
    }

    pub async fn bags(svc: &Services, quantity: i64) -> Stock {
        svc.create_stock(NewStock {
            name: "Pellet bolsa 15 kg".to_string(),
            unit: Unit::Bag,
            quantity,
            min_quantity: 5,
            price: Some(cents(900_000)),
        })
        .await
        .unwrap()
    }

    pub async fn rolls(svc: &Services, quantity: i64) -> SupplyStock {
        svc.create_supply(NewSupply {
            name: "Rollo de alfalfa".to_string(),
            unit: Unit::Roll,
            quantity,
            min_quantity: 2,
            unit_cost: None,
        })
        .await
        .unwrap()
    }
}

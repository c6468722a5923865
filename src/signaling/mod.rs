//! Контракт хранилища для сигналинга
//!
//! Сигналинг — обычные чтения и записи в общее хранилище документов. Одна
//! запись на звонок хранит offer и answer; две дописываемые коллекции хранят
//! кандидатов каждой стороны. У каждого поля один писатель, коллекции
//! разделены по ролям, транзакции не нужны.

pub mod memory;

pub use memory::InMemoryStore;

use crate::peer::types::{CandidatePayload, Role, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Документ под кодом встречи
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRecord {
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
}

impl CallRecord {
    pub fn field(&self, field: Field) -> Option<&SessionDescription> {
        match field {
            Field::Offer => self.offer.as_ref(),
            Field::Answer => self.answer.as_ref(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Offer,
    Answer,
}

impl Field {
    /// Поле, которое пишет `role`
    pub fn written_by(role: Role) -> Self {
        match role {
            Role::Initiator => Field::Offer,
            Role::Responder => Field::Answer,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SubCollection {
    OfferCandidates,
    AnswerCandidates,
}

impl SubCollection {
    /// Куда `role` пишет своих кандидатов
    pub fn own(role: Role) -> Self {
        match role {
            Role::Initiator => SubCollection::OfferCandidates,
            Role::Responder => SubCollection::AnswerCandidates,
        }
    }

    /// Откуда `role` читает кандидатов другой стороны
    pub fn peer(role: Role) -> Self {
        match role {
            Role::Initiator => SubCollection::AnswerCandidates,
            Role::Responder => SubCollection::OfferCandidates,
        }
    }
}

/// Поток изменений; drop отписывает.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// `None`, когда хранилище закрыло поток
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Общее хранилище для обмена данными сигналинга.
///
/// Подписка сначала отдаёт текущее состояние, затем каждую запись в порядке
/// записи.
#[async_trait]
pub trait RendezvousStore: Send + Sync {
    /// Создаёт пустую запись и возвращает её id (код встречи)
    async fn create_record(&self) -> Result<String>;

    async fn get_record(&self, id: &str) -> Result<Option<CallRecord>>;

    async fn set_field(&self, id: &str, field: Field, value: SessionDescription) -> Result<()>;

    async fn append_candidate(
        &self,
        id: &str,
        sub: SubCollection,
        item: CandidatePayload,
    ) -> Result<()>;

    async fn subscribe_record(&self, id: &str) -> Result<Subscription<CallRecord>>;

    async fn subscribe_candidates(
        &self,
        id: &str,
        sub: SubCollection,
    ) -> Result<Subscription<CandidatePayload>>;
}

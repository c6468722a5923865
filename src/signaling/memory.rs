use super::{CallRecord, Field, RendezvousStore, SubCollection, Subscription};
use crate::peer::types::{CandidatePayload, SessionDescription};
use crate::utils::random_id;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Entry {
    record: CallRecord,
    offer_candidates: Vec<CandidatePayload>,
    answer_candidates: Vec<CandidatePayload>,
    record_watchers: Vec<mpsc::UnboundedSender<CallRecord>>,
    offer_watchers: Vec<mpsc::UnboundedSender<CandidatePayload>>,
    answer_watchers: Vec<mpsc::UnboundedSender<CandidatePayload>>,
}

impl Entry {
    fn candidates(&mut self, sub: SubCollection) -> &mut Vec<CandidatePayload> {
        match sub {
            SubCollection::OfferCandidates => &mut self.offer_candidates,
            SubCollection::AnswerCandidates => &mut self.answer_candidates,
        }
    }

    fn watchers(&mut self, sub: SubCollection) -> &mut Vec<mpsc::UnboundedSender<CandidatePayload>> {
        match sub {
            SubCollection::OfferCandidates => &mut self.offer_watchers,
            SubCollection::AnswerCandidates => &mut self.answer_watchers,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    preset_ids: VecDeque<String>,
}

/// Хранилище в памяти процесса; обе стороны делят один экземпляр.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create_record` сначала выдаёт `ids`, потом случайные
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store.lock().preset_ids = ids.into_iter().map(Into::into).collect();
        store
    }

    /// Кладёт готовую запись, например от другого процесса
    pub fn insert_record(&self, id: &str, record: CallRecord) {
        self.lock().entries.entry(id.to_string()).or_default().record = record;
    }

    /// Снимок одной коллекции кандидатов
    pub fn candidates(&self, id: &str, sub: SubCollection) -> Vec<CandidatePayload> {
        self.lock()
            .entries
            .get_mut(id)
            .map(|entry| entry.candidates(sub).clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing(id: &str) -> Error {
    Error::StoreError(format!("no record {}", id))
}

#[async_trait]
impl RendezvousStore for InMemoryStore {
    async fn create_record(&self) -> Result<String> {
        let mut inner = self.lock();
        let id = loop {
            let id = inner.preset_ids.pop_front().unwrap_or_else(random_id);
            if !inner.entries.contains_key(&id) {
                break id;
            }
        };
        inner.entries.insert(id.clone(), Entry::default());
        debug!("Created record {}", id);
        Ok(id)
    }

    async fn get_record(&self, id: &str) -> Result<Option<CallRecord>> {
        Ok(self.lock().entries.get(id).map(|entry| entry.record.clone()))
    }

    async fn set_field(&self, id: &str, field: Field, value: SessionDescription) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(id).ok_or_else(|| missing(id))?;
        match field {
            Field::Offer => entry.record.offer = Some(value),
            Field::Answer => entry.record.answer = Some(value),
        }

        let snapshot = entry.record.clone();
        entry
            .record_watchers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        Ok(())
    }

    async fn append_candidate(
        &self,
        id: &str,
        sub: SubCollection,
        item: CandidatePayload,
    ) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(id).ok_or_else(|| missing(id))?;
        entry.candidates(sub).push(item.clone());
        entry.watchers(sub).retain(|tx| tx.send(item.clone()).is_ok());
        Ok(())
    }

    async fn subscribe_record(&self, id: &str) -> Result<Subscription<CallRecord>> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(id).ok_or_else(|| missing(id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(entry.record.clone());
        entry.record_watchers.push(tx);
        Ok(Subscription::new(rx))
    }

    async fn subscribe_candidates(
        &self,
        id: &str,
        sub: SubCollection,
    ) -> Result<Subscription<CandidatePayload>> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(id).ok_or_else(|| missing(id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        for item in entry.candidates(sub).iter() {
            let _ = tx.send(item.clone());
        }
        entry.watchers(sub).push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(text: &str) -> CandidatePayload {
        CandidatePayload {
            candidate: text.to_string(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[tokio::test]
    async fn preset_ids_then_random() {
        let store = InMemoryStore::with_ids(["abc123"]);
        assert_eq!(store.create_record().await.unwrap(), "abc123");
        let next = store.create_record().await.unwrap();
        assert_eq!(next.len(), 16);
        assert_eq!(store.get_record("abc123").await.unwrap(), Some(CallRecord::default()));
        assert_eq!(store.get_record("zzz000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_subscription_sees_current_state_then_writes() {
        let store = InMemoryStore::with_ids(["abc123"]);
        let id = store.create_record().await.unwrap();
        store
            .set_field(&id, Field::Offer, SessionDescription::offer("o"))
            .await
            .unwrap();

        let mut sub = store.subscribe_record(&id).await.unwrap();
        let first = sub.recv().await.unwrap();
        assert_eq!(first.offer, Some(SessionDescription::offer("o")));
        assert_eq!(first.answer, None);

        store
            .set_field(&id, Field::Answer, SessionDescription::answer("a"))
            .await
            .unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(second.answer, Some(SessionDescription::answer("a")));
    }

    #[tokio::test]
    async fn candidate_subscription_replays_in_write_order() {
        let store = InMemoryStore::with_ids(["abc123"]);
        let id = store.create_record().await.unwrap();
        store
            .append_candidate(&id, SubCollection::OfferCandidates, cand("c1"))
            .await
            .unwrap();

        let mut sub = store
            .subscribe_candidates(&id, SubCollection::OfferCandidates)
            .await
            .unwrap();
        store
            .append_candidate(&id, SubCollection::OfferCandidates, cand("c2"))
            .await
            .unwrap();
        store
            .append_candidate(&id, SubCollection::AnswerCandidates, cand("other"))
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap(), cand("c1"));
        assert_eq!(sub.recv().await.unwrap(), cand("c2"));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let store = InMemoryStore::with_ids(["abc123"]);
        let id = store.create_record().await.unwrap();
        let sub = store.subscribe_record(&id).await.unwrap();
        drop(sub);
        store
            .set_field(&id, Field::Offer, SessionDescription::offer("o"))
            .await
            .unwrap();
        assert!(store.lock().entries[&id].record_watchers.is_empty());
    }

    #[tokio::test]
    async fn writes_to_unknown_record_fail() {
        let store = InMemoryStore::new();
        let err = store
            .set_field("nope", Field::Answer, SessionDescription::answer("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreError(_)));
        assert!(store.subscribe_record("nope").await.is_err());
    }
}

use crate::peer::transport::Transport;
use crate::peer::types::{Candidate, CandidatePayload};
use tracing::{debug, info, warn};

/// Кандидаты, полученные до установки remote description.
///
/// До `mark_ready` всё складывается в очередь; после — уходит в транспорт сразу.
/// Ошибка применения одного кандидата не фатальна: ICE сам восстановится
/// на других кандидатах.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: Vec<Candidate>,
    ready: bool,
    applied: usize,
    rejected: usize,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn pending(&self) -> &[Candidate] {
        &self.pending
    }

    /// Сколько кандидатов транспорт принял
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Возвращает `true` только при первом вызове
    pub fn mark_ready(&mut self) -> bool {
        if self.ready {
            debug!("Candidate queue already ready");
            return false;
        }
        self.ready = true;
        true
    }

    pub async fn enqueue(&mut self, candidate: Candidate, transport: &dyn Transport) {
        if self.ready {
            self.apply(&candidate.payload, transport).await;
        } else {
            // Remote description ещё не установлен, сохраняем кандидат
            debug!(
                "Remote description not set yet, queuing candidate ({} pending)",
                self.pending.len() + 1
            );
            self.pending.push(candidate);
        }
    }

    /// Применяет все отложенные кандидаты в порядке поступления
    pub async fn drain_if_ready(&mut self, transport: &dyn Transport) -> usize {
        if !self.ready {
            return 0;
        }

        let candidates = std::mem::take(&mut self.pending);
        let count = candidates.len();
        if count > 0 {
            info!("Applying {} pending candidates", count);
        }
        for candidate in candidates {
            self.apply(&candidate.payload, transport).await;
        }
        count
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    async fn apply(&mut self, payload: &CandidatePayload, transport: &dyn Transport) {
        match transport.add_candidate(payload).await {
            Ok(()) => {
                self.applied += 1;
                debug!("Successfully added ICE candidate: {}", payload.candidate);
            }
            Err(e) => {
                self.rejected += 1;
                warn!("Failed to add ICE candidate, discarding: {}", e);
            }
        }
    }
}

/// Количество кандидатов по типам
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[CandidatePayload]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    summary
}

//! Admission & virtual queue (C10), per spec.md §4.4. The waiting order
//! and capacity counters live behind a single `std::sync::Mutex` (spec.md
//! §5's "single mutex (or equivalent)" requirement) — request handlers
//! and the 30 s maintenance tick both go through it. The ticket map
//! itself is a `tokio::sync::RwLock<HashMap<..>>` so read-mostly status
//! polling doesn't serialize behind the FIFO mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::model::{QueueTicket, TicketStatus};

/// A request to initiate a multipart session, as admitted or queued.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub user_id: String,
    pub total_size: u64,
    pub file_name: String,
    pub folder_id: String,
    pub mime_type: String,
}

/// Result of [`Admission::try_initiate_or_enqueue`].
#[derive(Debug, Clone)]
pub enum AdmissionOutcome {
    Active,
    Waiting { ticket_id: String, position: usize, eta_seconds: u64 },
}

/// Result of [`Admission::poll_ticket`].
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Waiting { position: usize },
    Ready { ticket: QueueTicket },
    Expired,
    NotFound,
}

struct Fifo {
    waiting: VecDeque<String>,
    active_count: u32,
    active_per_user: std::collections::HashMap<String, u32>,
    in_flight_bytes: u64,
}

/// Bounds concurrent active sessions, per-user sessions, and aggregate
/// in-flight bytes; gives bounded-wait fairness to overflow requests.
pub struct Admission {
    config: Arc<Config>,
    fifo: Mutex<Fifo>,
    tickets: RwLock<HashMap<String, QueueTicket>>,
}

impl Admission {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            fifo: Mutex::new(Fifo {
                waiting: VecDeque::new(),
                active_count: 0,
                active_per_user: std::collections::HashMap::new(),
                in_flight_bytes: 0,
            }),
            tickets: RwLock::new(HashMap::new()),
        }
    }

    /// spec.md §4.4 `tryInitiateOrEnqueue`.
    pub async fn try_initiate_or_enqueue(&self, req: InitiateRequest) -> crate::error::Result<AdmissionOutcome> {
        if req.total_size > self.config.max_file_size_bytes {
            return Err(crate::error::StorageError::FileTooLarge {
                size: req.total_size,
                max: self.config.max_file_size_bytes,
            });
        }

        let mut fifo = self.fifo.lock().unwrap();
        let user_active = *fifo.active_per_user.get(&req.user_id).unwrap_or(&0);
        let has_capacity = fifo.active_count < self.config.max_active_sessions
            && fifo.in_flight_bytes + req.total_size <= self.config.max_total_upload_bytes;

        if user_active < self.config.max_sessions_per_user && has_capacity {
            fifo.active_count += 1;
            *fifo.active_per_user.entry(req.user_id.clone()).or_insert(0) += 1;
            fifo.in_flight_bytes += req.total_size;
            return Ok(AdmissionOutcome::Active);
        }

        if fifo.waiting.len() as u32 >= self.config.max_queue_size {
            return Err(crate::error::StorageError::QueueFull);
        }

        let now = Utc::now();
        let ticket = QueueTicket {
            ticket_id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            status: TicketStatus::Waiting,
            requested_total_size: req.total_size,
            requested_file_name: req.file_name.clone(),
            requested_folder_id: req.folder_id.clone(),
            requested_mime_type: req.mime_type.clone(),
            session_id: None,
            created_at: now,
            ticket_expires_at: now + ChronoDuration::milliseconds(self.config.queue_ticket_ttl_ms as i64),
            ready_at: None,
            claim_deadline: None,
        };
        let ticket_id = ticket.ticket_id.clone();
        fifo.waiting.push_back(ticket_id.clone());
        let position = fifo.waiting.len();
        drop(fifo);
        self.tickets.write().await.insert(ticket_id.clone(), ticket);

        Ok(AdmissionOutcome::Waiting {
            ticket_id,
            position,
            eta_seconds: position as u64 * self.config.estimated_session_duration_seconds,
        })
    }

    /// spec.md §4.4 `getQueueStatus`: lazy-promote on poll, expire stale
    /// tickets, demote READY past its claim deadline.
    pub async fn poll_ticket(&self, ticket_id: &str) -> PollOutcome {
        self.run_maintenance().await;

        let ticket = match self.tickets.read().await.get(ticket_id).cloned() {
            Some(t) => t,
            None => return PollOutcome::NotFound,
        };

        match ticket.status {
            TicketStatus::Ready | TicketStatus::Active => PollOutcome::Ready { ticket },
            TicketStatus::Expired | TicketStatus::Cancelled => PollOutcome::Expired,
            TicketStatus::Waiting => {
                let fifo = self.fifo.lock().unwrap();
                let position = fifo.waiting.iter().position(|id| id == ticket_id).map(|p| p + 1).unwrap_or(0);
                drop(fifo);
                PollOutcome::Waiting { position }
            }
        }
    }

    /// Safety-net maintenance tick (spec.md §4.4, run every 30s by
    /// [`crate::service::StorageService`]'s background scheduler) and also
    /// invoked inline by [`Admission::poll_ticket`] for lazy promotion.
    pub async fn run_maintenance(&self) {
        let now = Utc::now();

        // Expire/demote existing Ready|Waiting tickets past their deadlines.
        let ids: Vec<String> = self.tickets.read().await.keys().cloned().collect();
        for id in &ids {
            let existing = self.tickets.read().await.get(id).cloned();
            if let Some(mut ticket) = existing {
                let mut changed = false;
                if ticket.status == TicketStatus::Waiting && now >= ticket.ticket_expires_at {
                    ticket.status = TicketStatus::Expired;
                    changed = true;
                    let mut fifo = self.fifo.lock().unwrap();
                    fifo.waiting.retain(|w| w != id);
                } else if ticket.status == TicketStatus::Ready {
                    if let Some(deadline) = ticket.claim_deadline {
                        if now >= deadline {
                            ticket.status = TicketStatus::Expired;
                            changed = true;
                        }
                    }
                }
                if changed {
                    self.tickets.write().await.insert(id.clone(), ticket);
                }
            }
        }

        self.promote_while_capacity().await;
    }

    /// Promotes WAITING tickets to READY while capacity allows. Called
    /// after maintenance, and imperatively after session
    /// completion/abort/cleanup per spec.md §4.4.
    fn next_waiting_id(&self) -> Option<String> {
        let fifo = self.fifo.lock().unwrap();
        fifo.waiting.front().cloned()
    }

    fn remove_from_waiting(&self, id: &str) {
        let mut fifo = self.fifo.lock().unwrap();
        fifo.waiting.retain(|w| w != id);
    }

    fn try_admit(&self, id: &str, ticket: &QueueTicket) -> bool {
        let mut fifo = self.fifo.lock().unwrap();
        let user_active = *fifo.active_per_user.get(&ticket.user_id).unwrap_or(&0);
        let has_capacity = fifo.active_count < self.config.max_active_sessions
            && fifo.in_flight_bytes + ticket.requested_total_size <= self.config.max_total_upload_bytes;

        if !(has_capacity && user_active < self.config.max_sessions_per_user) {
            return false;
        }

        // Remove from the waiting order before promoting, so a
        // concurrent promotion attempt can't double-admit this ticket.
        fifo.waiting.retain(|w| w != id);
        fifo.active_count += 1;
        *fifo.active_per_user.entry(ticket.user_id.clone()).or_insert(0) += 1;
        fifo.in_flight_bytes += ticket.requested_total_size;
        true
    }

    pub async fn promote_while_capacity(&self) {
        loop {
            let Some(next_id) = self.next_waiting_id() else { return };

            let Some(ticket) = self.tickets.read().await.get(&next_id).cloned() else {
                self.remove_from_waiting(&next_id);
                continue;
            };

            if !self.try_admit(&next_id, &ticket) {
                return;
            }

            let now = Utc::now();
            let mut ready_ticket = ticket;
            ready_ticket.status = TicketStatus::Ready;
            ready_ticket.ready_at = Some(now);
            ready_ticket.claim_deadline = Some(now + ChronoDuration::milliseconds(self.config.queue_ready_claim_ms as i64));
            self.tickets.write().await.insert(next_id, ready_ticket);
        }
    }

    /// Releases the capacity held by a completed/aborted/cleaned-up
    /// session, then triggers promotion (spec.md §4.4/§4.7).
    pub async fn release_session(&self, user_id: &str, total_size: u64) {
        {
            let mut fifo = self.fifo.lock().unwrap();
            fifo.active_count = fifo.active_count.saturating_sub(1);
            fifo.in_flight_bytes = fifo.in_flight_bytes.saturating_sub(total_size);
            if let Some(count) = fifo.active_per_user.get_mut(user_id) {
                *count = count.saturating_sub(1);
            }
        }
        self.promote_while_capacity().await;
    }

    /// Records that a READY ticket was claimed into `session_id`, moving
    /// it to ACTIVE.
    pub async fn claim_ticket(&self, ticket_id: &str, session_id: &str) -> Option<QueueTicket> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets.get_mut(ticket_id)?;
        if ticket.status != TicketStatus::Ready {
            return None;
        }
        ticket.status = TicketStatus::Active;
        ticket.session_id = Some(session_id.to_string());
        Some(ticket.clone())
    }
}

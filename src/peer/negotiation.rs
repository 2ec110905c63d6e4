//! Offer/answer exchange.
//!
//! Every interaction with the transport engine is a [`Step`]: a future that
//! owns what it needs, runs detached from the session, and reports a single
//! `Result` that re-enters the session queue. [`StepQueue`] keeps at most one
//! step in flight so descriptions and candidates reach the engine in the order
//! the session decided on.

use crate::error::{NegotiationError, NegotiationStage};
use crate::peer::engine::{DataLink, TransportEngine};
use crate::peer::ice::apply_candidates;
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Initiator: open the data link, attach tracks, create and apply an offer.
    Offer,
    ApplyRemote(SessionDescription),
    /// Responder: attach tracks, create and apply an answer.
    Answer,
    ApplyCandidates(Vec<IceCandidate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Offer,
    ApplyRemote,
    Answer,
    ApplyCandidates,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Offer => StepKind::Offer,
            Step::ApplyRemote(_) => StepKind::ApplyRemote,
            Step::Answer => StepKind::Answer,
            Step::ApplyCandidates(_) => StepKind::ApplyCandidates,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Offer => "offer",
            StepKind::ApplyRemote => "apply remote description",
            StepKind::Answer => "answer",
            StepKind::ApplyCandidates => "apply candidates",
        };
        f.write_str(name)
    }
}

pub enum StepOutput {
    Offered {
        link: Option<Arc<dyn DataLink>>,
        offer: SessionDescription,
    },
    RemoteApplied(SdpKind),
    Answered(SessionDescription),
    CandidatesApplied {
        applied: usize,
        failed: usize,
    },
}

impl fmt::Debug for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutput::Offered { link, offer } => f
                .debug_struct("Offered")
                .field("link", &link.as_ref().map(|l| l.label().to_owned()))
                .field("offer", offer)
                .finish(),
            StepOutput::RemoteApplied(kind) => f.debug_tuple("RemoteApplied").field(kind).finish(),
            StepOutput::Answered(answer) => f.debug_tuple("Answered").field(answer).finish(),
            StepOutput::CandidatesApplied { applied, failed } => f
                .debug_struct("CandidatesApplied")
                .field("applied", applied)
                .field("failed", failed)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: StepKind,
    pub result: Result<StepOutput, NegotiationError>,
}

/// Single-flight queue of pending steps.
#[derive(Debug, Default)]
pub struct StepQueue {
    in_flight: Option<StepKind>,
    backlog: VecDeque<Step>,
}

impl StepQueue {
    pub fn push_back(&mut self, step: Step) {
        self.backlog.push_back(step);
    }

    pub fn push_front(&mut self, step: Step) {
        self.backlog.push_front(step);
    }

    /// Appends to a trailing candidate batch when there is one, keeping arrival order.
    pub fn push_candidate(&mut self, candidate: IceCandidate) {
        if let Some(Step::ApplyCandidates(batch)) = self.backlog.back_mut() {
            batch.push(candidate);
        } else {
            self.backlog.push_back(Step::ApplyCandidates(vec![candidate]));
        }
    }

    /// Next step to start, if nothing is in flight.
    pub fn start_next(&mut self) -> Option<Step> {
        if self.in_flight.is_some() {
            return None;
        }
        let step = self.backlog.pop_front()?;
        self.in_flight = Some(step.kind());
        Some(step)
    }

    pub fn finish(&mut self, kind: StepKind) {
        if self.in_flight != Some(kind) {
            warn!("Finished {kind} step but {:?} was in flight", self.in_flight);
        }
        self.in_flight = None;
    }

    #[cfg(test)]
    fn in_flight(&self) -> Option<StepKind> {
        self.in_flight
    }

    #[cfg(test)]
    fn is_busy(&self) -> bool {
        self.in_flight.is_some() || !self.backlog.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_flight = None;
        self.backlog.clear();
    }
}

/// Produces and consumes session descriptions against one transport engine.
#[derive(Clone)]
pub struct NegotiationEngine {
    transport: Arc<dyn TransportEngine>,
    data_link_label: String,
}

impl NegotiationEngine {
    pub fn new(transport: Arc<dyn TransportEngine>, data_link_label: impl Into<String>) -> Self {
        Self {
            transport,
            data_link_label: data_link_label.into(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn TransportEngine> {
        &self.transport
    }

    /// Builds the future for `step`. Offer and answer refuse to run without local media.
    pub fn run(
        &self,
        step: Step,
        media: Option<LocalMedia>,
    ) -> BoxFuture<'static, Result<StepOutput, NegotiationError>> {
        let transport = Arc::clone(&self.transport);
        match step {
            Step::Offer => {
                let label = self.data_link_label.clone();
                async move {
                    let media = media.ok_or(NegotiationError::NoLocalMedia)?;
                    offer(transport.as_ref(), &label, &media).await
                }
                .boxed()
            }
            Step::ApplyRemote(description) => {
                async move { apply_remote(transport.as_ref(), description).await }.boxed()
            }
            Step::Answer => async move {
                let media = media.ok_or(NegotiationError::NoLocalMedia)?;
                answer(transport.as_ref(), &media).await
            }
            .boxed(),
            Step::ApplyCandidates(candidates) => async move {
                let (applied, failed) = apply_candidates(transport.as_ref(), candidates).await;
                Ok(StepOutput::CandidatesApplied { applied, failed })
            }
            .boxed(),
        }
    }
}

async fn attach_tracks(transport: &dyn TransportEngine, media: &LocalMedia) {
    match transport.replace_tracks(media).await {
        Ok(()) => debug!("Attached {} local track(s)", media.tracks().len()),
        Err(e) => warn!("Failed to attach local tracks: {e}"),
    }
}

async fn offer(
    transport: &dyn TransportEngine,
    label: &str,
    media: &LocalMedia,
) -> Result<StepOutput, NegotiationError> {
    info!("Partner found, creating SDP offer and data channel");

    let link = match transport.create_data_link(label).await {
        Ok(link) => Some(link),
        Err(e) => {
            warn!("Failed to create data channel: {e}");
            None
        }
    };

    attach_tracks(transport, media).await;

    let offer = transport
        .create_offer()
        .await
        .map_err(NegotiationError::at(NegotiationStage::CreateOffer))?;
    let offer = transport
        .set_local_description(offer)
        .await
        .map_err(NegotiationError::at(NegotiationStage::SetLocalDescription))?;

    Ok(StepOutput::Offered { link, offer })
}

async fn apply_remote(
    transport: &dyn TransportEngine,
    description: SessionDescription,
) -> Result<StepOutput, NegotiationError> {
    let kind = description.kind;
    transport
        .set_remote_description(description)
        .await
        .map_err(NegotiationError::at(NegotiationStage::SetRemoteDescription))?;
    debug!("Remote {kind:?} applied");
    Ok(StepOutput::RemoteApplied(kind))
}

async fn answer(
    transport: &dyn TransportEngine,
    media: &LocalMedia,
) -> Result<StepOutput, NegotiationError> {
    attach_tracks(transport, media).await;

    let answer = transport
        .create_answer()
        .await
        .map_err(NegotiationError::at(NegotiationStage::CreateAnswer))?;
    let answer = transport
        .set_local_description(answer)
        .await
        .map_err(NegotiationError::at(NegotiationStage::SetLocalDescription))?;

    Ok(StepOutput::Answered(answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n}"))
    }

    #[test]
    fn one_step_in_flight_at_a_time() {
        let mut queue = StepQueue::default();
        queue.push_back(Step::Offer);
        queue.push_back(Step::Answer);

        assert_eq!(queue.start_next(), Some(Step::Offer));
        assert_eq!(queue.start_next(), None);
        assert_eq!(queue.in_flight(), Some(StepKind::Offer));

        queue.finish(StepKind::Offer);
        assert_eq!(queue.start_next(), Some(Step::Answer));
        queue.finish(StepKind::Answer);
        assert!(!queue.is_busy());
    }

    #[test]
    fn candidates_coalesce_only_at_the_tail() {
        let mut queue = StepQueue::default();
        queue.push_candidate(cand(1));
        queue.push_candidate(cand(2));
        queue.push_back(Step::Answer);
        queue.push_candidate(cand(3));

        assert_eq!(
            queue.start_next(),
            Some(Step::ApplyCandidates(vec![cand(1), cand(2)]))
        );
        queue.finish(StepKind::ApplyCandidates);
        assert_eq!(queue.start_next(), Some(Step::Answer));
        queue.finish(StepKind::Answer);
        assert_eq!(queue.start_next(), Some(Step::ApplyCandidates(vec![cand(3)])));
    }

    #[test]
    fn clear_forgets_in_flight_and_backlog() {
        let mut queue = StepQueue::default();
        queue.push_back(Step::Offer);
        queue.push_back(Step::Answer);
        queue.start_next();
        queue.clear();
        assert!(!queue.is_busy());
        assert_eq!(queue.start_next(), None);
    }
}

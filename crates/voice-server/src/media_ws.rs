//! `GET /media/ws` (§6 "Media socket"): the provider's bidirectional media
//! WebSocket, one connection per in-progress call, driving one
//! [`voice_session::Session`] end to end.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use voice_orchestrator::Orchestrator;
use voice_persistence::{Store, TranscriptBuffer};
use voice_pool::{SttConnector, SttPool, TtsQueue};
use voice_provider::TelephonyProvider;
use voice_session::{
    InboundMediaFrame, KnowledgeBase, LlmClient, MediaSink, OutboundMediaFrame, Session, SessionConfig,
    TtsSynthesizer,
};

pub struct MediaState<S, P, C> {
    pub store: Arc<S>,
    pub orchestrator: Arc<Orchestrator<S, P>>,
    pub transcript_buffer: Arc<TranscriptBuffer<S>>,
    pub stt_pool: Arc<SttPool<C>>,
    pub tts_queue: Arc<TtsQueue>,
    pub tts: Arc<dyn TtsSynthesizer>,
    pub llm: Arc<dyn LlmClient>,
    pub kb: Option<Arc<dyn KnowledgeBase>>,
    pub session_config: SessionConfig,
}

impl<S, P, C> Clone for MediaState<S, P, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            orchestrator: self.orchestrator.clone(),
            transcript_buffer: self.transcript_buffer.clone(),
            stt_pool: self.stt_pool.clone(),
            tts_queue: self.tts_queue.clone(),
            tts: self.tts.clone(),
            llm: self.llm.clone(),
            kb: self.kb.clone(),
            session_config: self.session_config.clone(),
        }
    }
}

pub fn routes<S, P, C>() -> Router<MediaState<S, P, C>>
where
    S: Store + 'static,
    P: TelephonyProvider + 'static,
    C: SttConnector + 'static,
{
    Router::new().route("/media/ws", get(upgrade))
}

async fn upgrade<S, P, C>(ws: WebSocketUpgrade, State(state): State<MediaState<S, P, C>>) -> impl IntoResponse
where
    S: Store + 'static,
    P: TelephonyProvider + 'static,
    C: SttConnector + 'static,
{
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = drive(socket, state).await {
            warn!(%err, "media socket session ended with an error");
        }
    })
}

struct WsMediaSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MediaSink for WsMediaSink {
    async fn send_frame(&mut self, frame: OutboundMediaFrame) -> Result<(), String> {
        self.sink
            .send(Message::Text(frame.to_json_line()))
            .await
            .map_err(|err| err.to_string())
    }
}

/// Reads frames off the raw socket until `start`, handing decoded audio to
/// the session's channel and stop/hangup through `hangup` (§4.4.5).
async fn pump_inbound(
    mut recv: futures::stream::SplitStream<WebSocket>,
    audio_tx: mpsc::Sender<Vec<u8>>,
    hangup: CancellationToken,
) {
    use futures::StreamExt;
    while let Some(Ok(msg)) = recv.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = InboundMediaFrame::from_json_line(&text) else {
            continue;
        };
        match frame {
            InboundMediaFrame::Media { .. } => {
                if let Some(pcm) = frame.decode_audio() {
                    if audio_tx.send(pcm).await.is_err() {
                        break;
                    }
                }
            }
            InboundMediaFrame::Stop => {
                hangup.cancel();
                break;
            }
            _ => {}
        }
    }
    hangup.cancel();
}

async fn drive<S, P, C>(socket: WebSocket, state: MediaState<S, P, C>) -> Result<(), String>
where
    S: Store + 'static,
    P: TelephonyProvider + 'static,
    C: SttConnector + 'static,
{
    use futures::StreamExt;

    let (sink, mut recv) = socket.split();

    let (stream_sid, call_sid) = loop {
        match recv.next().await {
            Some(Ok(Message::Text(text))) => match InboundMediaFrame::from_json_line(&text) {
                Ok(InboundMediaFrame::Start { stream_sid, call_sid }) => {
                    break (stream_sid, call_sid);
                }
                Ok(InboundMediaFrame::Connected) => continue,
                _ => continue,
            },
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.to_string()),
            None => return Err("socket closed before start frame".to_string()),
        }
    };

    let mut call = state
        .store
        .find_call_by_provider_id(&call_sid)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no call for provider call id {call_sid}"))?;
    let agent = state
        .store
        .get_agent(&call.agent_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("agent {} not found", call.agent_id))?;

    call.mark_started(Utc::now());
    state.store.update_call(call.clone()).await.map_err(|e| e.to_string())?;
    info!(call_id = %call.id, %stream_sid, "media session started");

    let (audio_tx, audio_rx) = mpsc::channel(64);
    let hangup = CancellationToken::new();
    tokio::spawn(pump_inbound(recv, audio_tx, hangup.clone()));

    let session = Session::new(
        call,
        agent,
        state.session_config.clone(),
        stream_sid,
        state.stt_pool.clone(),
        state.tts_queue.clone(),
        state.tts.clone(),
        state.llm.clone(),
        state.kb.clone(),
        Box::new(WsMediaSink { sink }),
        audio_rx,
        hangup,
    );

    let summary = session.run().await;
    let call_id = summary.call.id;

    if !summary.transcript.is_empty() {
        for turn in summary.transcript {
            state.transcript_buffer.push(turn).await;
        }
        state.transcript_buffer.flush_all().await;
    }
    if let Err(err) = state.store.update_call(summary.call).await {
        warn!(%call_id, %err, "failed to persist final call state");
    }
    state.orchestrator.on_terminal_status(call_id);
    info!(%call_id, "media session ended");

    Ok(())
}

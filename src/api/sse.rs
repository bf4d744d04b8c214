//! Server-Sent Events framing for a running turn

use crate::translator::WireEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Frame wire events as `data:` lines.
///
/// The response owns a drop guard on `cancel`: when the client goes away
/// and axum drops the body, the turn is cancelled.
pub fn sse_stream<S>(
    events: S,
    cancel: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = WireEvent> + Send + 'static,
{
    let guard = cancel.drop_guard();
    let framed = async_stream::stream! {
        let _guard = guard;
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            yield Ok::<_, Infallible>(Event::default().data(event.data()));
        }
    };

    Sse::new(framed).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

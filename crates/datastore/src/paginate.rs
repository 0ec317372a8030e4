//! Offset pagination.
//!
//! The protocol: request offset 0, read how far the response advances the
//! offset, and keep going while that moves the offset forward. The response
//! that does *not* advance the offset marks exhaustion and is not yielded.
//!
//! There is no page ceiling. A server that always reports a positive advance
//! produces an endless stream; that is the server's contract to honour.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use futures::Stream;
use std::future::Future;

/// Lazily drive a paginated source.
///
/// `request` is called with the current offset, `advance` extracts the step
/// from each response. Pages are requested strictly one after the other since
/// each offset depends on the previous response. The stream is finite only
/// if `advance` eventually returns zero, and it is not restartable: calling
/// `paginate` again re-issues every request from offset 0.
///
/// The first error ends the stream.
pub fn paginate<'a, R, F, Fut, A>(mut request: F, advance: A) -> impl Stream<Item = Result<R>> + Send + 'a
where
    R: Send + 'a,
    F: FnMut(u64) -> Fut + Send + 'a,
    Fut: Future<Output = Result<R>> + Send + 'a,
    A: Fn(&R) -> Result<u64> + Send + 'a,
{
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        let mut offset = 0_u64;
        loop {
            let response = match request(offset).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let step = match advance(&response) {
                Ok(step) => step,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let Some(next) = offset.checked_add(step) else {
                yield Err(exn::Exn::from(ErrorKind::Fetch(format!("offset overflow after {offset}"))));
                return;
            };
            if next <= offset {
                tracing::debug!(offset, "pagination exhausted");
                return;
            }
            yield Ok(response);
            offset = next;
        }
    })
}

//! Stage capabilities and shared stage policies.
//!
//! A stage body implements exactly one role capability:
//! - [`Source`] produces rows lazily, one `next_row` call at a time,
//! - [`Transform`] turns each input row into zero or more output rows and may
//!   emit trailing rows when its upstreams end,
//! - [`Destination`] writes rows and is closed once at end of stream.
//!
//! Lookups are transforms; [`MatchLookup`] is the usual implementation.

mod buffered;
mod context;
mod functions;
mod lookup;
mod options;
mod paginated;

pub use buffered::{
    Buffer, BufferedDestination, BufferedTransform, FlushDestination, FlushTransform,
};
pub use context::StageContext;
pub use functions::{FnDestination, FnTransform, IterSource};
pub use lookup::{BasicLookup, LookupFetcher, MatchLookup};
pub use options::{StageOptions, DEFAULT_BUFFER_SIZE, DEFAULT_PAGE_SIZE};
pub use paginated::{PageCursor, PageFetcher, PaginatedSource};

use crate::core::{Emitter, Row, StageRole};
use crate::errors::StageError;
use async_trait::async_trait;

/// Produces the rows of a dataflow graph.
#[async_trait]
pub trait Source: Send {
    /// Returns the next row, or `None` once the source is exhausted.
    async fn next_row(&mut self, ctx: &mut StageContext) -> Result<Option<Row>, StageError>;
}

/// Turns input rows into output rows.
#[async_trait]
pub trait Transform: Send {
    /// Processes one input row, emitting any number of output rows.
    async fn process(
        &mut self,
        row: Row,
        ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError>;

    /// Called once after every upstream has ended. May emit trailing rows.
    async fn close(
        &mut self,
        _ctx: &mut StageContext,
        _out: &mut Emitter,
    ) -> Result<(), StageError> {
        Ok(())
    }
}

/// Writes rows to an external system.
#[async_trait]
pub trait Destination: Send {
    /// Writes one row.
    async fn write(&mut self, row: Row, ctx: &mut StageContext) -> Result<(), StageError>;

    /// Called once after every upstream has ended.
    async fn close(&mut self, _ctx: &mut StageContext) -> Result<(), StageError> {
        Ok(())
    }
}

/// A stage body bound to a node.
pub enum StageBody {
    /// A row producer.
    Source(Box<dyn Source>),
    /// A row transformer, also used for lookups.
    Transform(Box<dyn Transform>),
    /// A row consumer.
    Destination(Box<dyn Destination>),
}

impl StageBody {
    /// Wraps a source.
    pub fn source(source: impl Source + 'static) -> Self {
        Self::Source(Box::new(source))
    }

    /// Wraps a transform.
    pub fn transform(transform: impl Transform + 'static) -> Self {
        Self::Transform(Box::new(transform))
    }

    /// Wraps a destination.
    pub fn destination(destination: impl Destination + 'static) -> Self {
        Self::Destination(Box::new(destination))
    }

    /// Returns the capability name, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Transform(_) => "transform",
            Self::Destination(_) => "destination",
        }
    }

    /// Returns true if this body can serve a node of `role`.
    #[must_use]
    pub const fn fits(&self, role: StageRole) -> bool {
        matches!(
            (self, role),
            (Self::Source(_), StageRole::Source)
                | (Self::Transform(_), StageRole::Transform | StageRole::Lookup)
                | (Self::Destination(_), StageRole::Destination)
        )
    }
}

impl std::fmt::Debug for StageBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StageBody").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_role_fit() {
        let source = StageBody::source(IterSource::new(vec![json!(1)]));
        let transform = StageBody::transform(FnTransform::new(|row, out: &mut Emitter| {
            out.emit(row);
            Ok(())
        }));
        let destination = StageBody::destination(FnDestination::new(|_row| Ok(())));

        assert!(source.fits(StageRole::Source));
        assert!(!source.fits(StageRole::Transform));
        assert!(transform.fits(StageRole::Transform));
        assert!(transform.fits(StageRole::Lookup));
        assert!(!transform.fits(StageRole::Destination));
        assert!(destination.fits(StageRole::Destination));
        assert_eq!(format!("{destination:?}"), "StageBody(\"destination\")");
    }

    #[tokio::test]
    async fn test_default_close_is_noop() {
        struct Upper;

        #[async_trait]
        impl Transform for Upper {
            async fn process(
                &mut self,
                row: Row,
                _ctx: &mut StageContext,
                out: &mut Emitter,
            ) -> Result<(), StageError> {
                let text = row.as_str().unwrap_or_default().to_uppercase();
                out.emit(json!(text));
                Ok(())
            }
        }

        let mut ctx = StageContext::detached("upper", StageOptions::new());
        let mut out = Emitter::new();
        let mut stage = Upper;
        stage.process(json!("a"), &mut ctx, &mut out).await.unwrap();
        stage.close(&mut ctx, &mut out).await.unwrap();
        assert_eq!(out.into_rows(), vec![json!("A")]);
    }
}

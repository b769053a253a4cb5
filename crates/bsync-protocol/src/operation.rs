//! The four build operations and how each maps onto a request.

use bsync_pack::Package;
use bytes::Bytes;

use crate::codec::RelinkCodec;
use crate::endpoint::{content_types, endpoints, headers, params};
use crate::envelope::{Method, TransportRequest};
use crate::error::ProtocolResult;
use crate::relink::RelinkEntry;

#[derive(Clone, Debug)]
pub enum Operation {
    /// Full build of the packaged project.
    Link { package: Package },
    /// Incremental build from changed entries only.
    Relink { entries: Vec<RelinkEntry> },
    /// Run the project's tests.
    Test {
        package: Package,
        filter: Option<String>,
    },
    /// Build and publish.
    Publish {
        package: Package,
        tag: Option<String>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Link { .. } => "link",
            Self::Relink { .. } => "relink",
            Self::Test { .. } => "test",
            Self::Publish { .. } => "publish",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Link { .. } => endpoints::LINK,
            Self::Relink { .. } => endpoints::RELINK,
            Self::Test { .. } => endpoints::TEST,
            Self::Publish { .. } => endpoints::PUBLISH,
        }
    }

    /// The package sent by full operations.
    pub fn package(&self) -> Option<&Package> {
        match self {
            Self::Link { package } | Self::Test { package, .. } | Self::Publish { package, .. } => {
                Some(package)
            }
            Self::Relink { .. } => None,
        }
    }

    /// Build the request for `project_id`, attaching `hint` when known.
    pub fn to_request(&self, project_id: &str, hint: Option<&str>) -> ProtocolResult<TransportRequest> {
        let (body, content_type) = match self {
            Self::Relink { entries } => (
                Bytes::from(RelinkCodec::encode_all(entries)?),
                content_types::RELINK,
            ),
            Self::Link { package } | Self::Test { package, .. } | Self::Publish { package, .. } => {
                (package.bytes.clone(), content_types::PACKAGE)
            }
        };

        let mut request = TransportRequest::new(Method::Post, self.endpoint())
            .header(headers::CONTENT_TYPE, content_type)
            .param(params::PROJECT, project_id)
            .body(body);
        if let Some(hint) = hint {
            request = request.header(headers::ROUTING_HINT, hint);
        }
        match self {
            Self::Test {
                filter: Some(filter),
                ..
            } => request = request.param(params::FILTER, filter.as_str()),
            Self::Publish { tag: Some(tag), .. } => request = request.param(params::TAG, tag.as_str()),
            _ => {}
        }
        Ok(request)
    }
}

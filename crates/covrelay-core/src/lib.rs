//! covrelay core library
//!
//! Provenance extraction (git metadata, repository id, CI context) and
//! best-effort publication of structured coverage reports.

pub mod amqp;
pub mod ci;
pub mod error;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod provenance;
pub mod publish;
pub mod repo_identity;
pub mod report;
pub mod telemetry;

pub use amqp::AmqpBroker;
pub use ci::{CiContext, CiProvider};
pub use error::{GitError, IdentityError, PublishError};
pub use git::{inspect, GitMetadata, Head};
pub use provenance::{Provenance, RepositoryIdentity};
pub use publish::{publish_report, Broker, Publisher, EXCHANGE, ROUTING_KEY};
pub use repo_identity::{parse_remote, RepoIdentityResolver, RepoSlug};
pub use report::{CoverageData, CoverageReport, COVERAGE_FORMAT};

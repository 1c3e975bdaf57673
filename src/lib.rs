//! # Kustos (Authentication & Session-Security Core)
//!
//! `kustos` is the authentication core extracted from a larger multi-tenant
//! application. It owns exactly four concerns and nothing else:
//!
//! 1. **Token issuance/verification** — short-lived access tokens (15 min)
//!    and long-lived refresh tokens (7 days), signed HS256 with distinct
//!    secrets per class so an access-key compromise cannot forge refresh
//!    tokens.
//! 2. **Revocation** — a durable blacklist of token hashes plus per-subject
//!    tombstones for revoke-all-sessions. Raw tokens are never persisted.
//! 3. **Session tracking** — one row per authenticated device/browser,
//!    keyed by the hash of its current refresh token, with device and IP
//!    metadata. Deactivation is terminal; rotation creates a new row.
//! 4. **Account lockout** — consecutive-failure counting with timed locks
//!    that escalate to an emailed unlock-token flow under sustained abuse.
//!
//! ## Storage & Retention
//!
//! State lives in `PostgreSQL` (`db/sql/schema.sql`): `revoked_tokens`,
//! `subject_tombstones`, and `auth_sessions`. A background sweeper prunes
//! revocation records past their natural expiry and garbage-collects
//! inactive sessions idle beyond the retention window (default 30 days).
//! Both deletes are idempotent, so overlapping sweep runs are harmless.
//!
//! ## Trust boundaries
//!
//! User profiles and email delivery are collaborators, reached only through
//! the `UserDirectory` and `UnlockMailer` traits. The auth core owns no user
//! field beyond lockout state.

pub mod api;
pub mod cli;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Camera control sessions.
//!
//! A session is opened against a device endpoint with a set of credentials
//! and then reused for every continuous move and stop sent to that device.

use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Username/password pair used to authenticate a control session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// True when no username is set (requests go out unauthenticated).
    pub fn is_anonymous(&self) -> bool {
        self.user.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Pan/tilt velocity vector, each axis in `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity {
    /// Pan (positive = right).
    pub x: f32,
    /// Tilt (positive = up).
    pub y: f32,
}

impl Velocity {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Apply per-device axis inversion.
    pub fn inverted(self, horizontal: bool, vertical: bool) -> Self {
        Self {
            x: if horizontal { -self.x } else { self.x },
            y: if vertical { -self.y } else { self.y },
        }
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device rejected request: {0}")]
    Rejected(String),

    #[error("Device does not support pan/tilt control")]
    Unsupported,

    #[error("Malformed device response: {0}")]
    Malformed(String),

    #[error("Session establishment timed out")]
    Timeout,
}

/// An open control channel to one device.
pub trait ControlSession: Send + Sync + 'static {
    /// Device endpoint the session was opened against.
    fn endpoint(&self) -> &str;

    /// Credentials the session was opened with.
    fn credentials(&self) -> &Credentials;

    /// Start moving at `velocity` until stopped.
    fn continuous_move(
        &self,
        velocity: Velocity,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Stop pan/tilt movement.
    fn stop(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Opens control sessions.
pub trait SessionProvider: Send + Sync + 'static {
    type Session: ControlSession;

    /// Open a session to the device reachable at `endpoint`.
    fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}

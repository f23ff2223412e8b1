//! Connection settings.

use crate::error::SessionError;
use crate::frame::{
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    MAX_FRAME_SIZE, MAX_WINDOW_SIZE, Setting,
};

/// One side's SETTINGS values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Defaults for a client: server push disabled.
    pub fn client() -> Self {
        Self {
            enable_push: false,
            ..Self::default()
        }
    }

    /// Apply one received parameter, validating its range.
    pub fn apply(&mut self, setting: Setting) -> Result<(), SessionError> {
        match setting {
            Setting::HeaderTableSize(v) => self.header_table_size = v,
            Setting::EnablePush(v) => self.enable_push = v,
            Setting::MaxConcurrentStreams(v) => self.max_concurrent_streams = Some(v),
            Setting::InitialWindowSize(v) => {
                if v > MAX_WINDOW_SIZE {
                    return Err(SessionError::FlowControl("SETTINGS_INITIAL_WINDOW_SIZE too large"));
                }
                self.initial_window_size = v;
            }
            Setting::MaxFrameSize(v) => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&v) {
                    return Err(SessionError::Protocol("SETTINGS_MAX_FRAME_SIZE out of range"));
                }
                self.max_frame_size = v;
            }
            Setting::MaxHeaderListSize(v) => self.max_header_list_size = Some(v),
            Setting::Unknown(..) => {}
        }
        Ok(())
    }

    /// Parameters that differ from the protocol defaults.
    pub fn to_params(&self) -> Vec<Setting> {
        let defaults = Settings::default();
        let mut params = Vec::new();

        if self.header_table_size != defaults.header_table_size {
            params.push(Setting::HeaderTableSize(self.header_table_size));
        }
        if self.enable_push != defaults.enable_push {
            params.push(Setting::EnablePush(self.enable_push));
        }
        if let Some(v) = self.max_concurrent_streams {
            params.push(Setting::MaxConcurrentStreams(v));
        }
        if self.initial_window_size != defaults.initial_window_size {
            params.push(Setting::InitialWindowSize(self.initial_window_size));
        }
        if self.max_frame_size != defaults.max_frame_size {
            params.push(Setting::MaxFrameSize(self.max_frame_size));
        }
        if let Some(v) = self.max_header_list_size {
            params.push(Setting::MaxHeaderListSize(v));
        }

        params
    }
}

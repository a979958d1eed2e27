/// PTY dimensions negotiated for a channel, or the §4.C/§6 defaults when
/// the client never sends one.
#[derive(Debug, Clone, Copy)]
pub struct PtyInfo {
    pub col_width: u32,
    pub row_height: u32,
}

impl Default for PtyInfo {
    fn default() -> Self {
        Self {
            col_width: tnt_core::DEFAULT_TERM_WIDTH,
            row_height: tnt_core::DEFAULT_TERM_HEIGHT,
        }
    }
}

impl PtyInfo {
    pub fn from_request(col_width: u32, row_height: u32) -> Self {
        Self {
            col_width: if col_width == 0 {
                tnt_core::DEFAULT_TERM_WIDTH
            } else {
                col_width
            },
            row_height: if row_height == 0 {
                tnt_core::DEFAULT_TERM_HEIGHT
            } else {
                row_height
            },
        }
    }
}

//! A minimal ANSI terminal renderer: the external collaborator the core
//! invokes through [`tnt_core::Renderer`]. Escape-sequence composition and
//! help-text copy live entirely here -- the core never sees them.

use std::sync::Arc;

use async_trait::async_trait;
use tnt_core::session::{HelpLang, Mode};
use tnt_core::{Renderer, Room, Session};

const CLEAR: &str = "\x1b[2J\x1b[H";
const HELP_EN: &str = "\
tnt -- terminal chat
  i        insert mode (type a message, Enter to send)
  Esc      back to normal mode
  j / k    scroll older / newer
  g / G    jump to top / bottom
  :        command mode (list, help, clear)
  ?        this help (q or Esc to close, e/z for English/Chinese)
  Ctrl+C   normal mode disconnects, elsewhere returns to normal";
const HELP_ZH: &str = "\
tnt -- 终端聊天室
  i        插入模式 (输入消息，回车发送)
  Esc      返回普通模式
  j / k    向上/向下滚动
  g / G    跳到顶部/底部
  :        命令模式 (list, help, clear)
  ?        帮助 (q 或 Esc 关闭，e/z 切换英文/中文)
  Ctrl+C   普通模式下断开连接，其他模式下返回普通模式";

pub struct AnsiRenderer;

fn format_message(msg: &tnt_core::Message) -> String {
    if msg.username == tnt_core::SYSTEM_AUTHOR {
        format!("*** {}", msg.content)
    } else {
        format!("{}: {}", msg.username, msg.content)
    }
}

#[async_trait]
impl Renderer for AnsiRenderer {
    async fn render_main(&self, room: &Room, session: &Arc<Session>) {
        // Copy the visible slice under the room's read lock, then drop it
        // before writing anything to the channel.
        let history = room.history_snapshot();

        let (width, term_height, scroll_pos, display_name, mode) = {
            let ui = session.ui();
            (
                ui.term_width as usize,
                ui.term_height,
                ui.scroll_pos,
                ui.display_name.clone(),
                ui.mode,
            )
        };

        let body_rows = tnt_core::fsm::visible_body_rows(term_height);
        // The FSM already clamps `scroll_pos` against the room's message
        // count at key-handling time; re-clamp here too in case history
        // shrank from eviction between that key press and this render.
        let max_scroll = history.len().saturating_sub(body_rows);
        let scroll = scroll_pos.min(max_scroll);
        let end = history.len().saturating_sub(scroll);
        let start = end.saturating_sub(body_rows);
        let visible = &history[start..end];
        let position = end.min(history.len());

        let mut out = String::new();
        out.push_str(CLEAR);
        out.push_str(&format!("tnt \u{2500} {display_name}\r\n"));
        for msg in visible {
            let line = format_message(msg);
            out.push_str(&truncate_line(&line, width));
            out.push_str("\r\n");
        }
        for _ in visible.len()..body_rows {
            out.push_str("\r\n");
        }
        out.push_str(&"\u{2500}".repeat(width.min(200)));
        out.push_str("\r\n");
        out.push_str(&status_line(mode, position, history.len()));

        session.write(out.as_bytes());
    }

    async fn render_input(&self, session: &Arc<Session>, input_bytes: &[u8]) {
        let input = String::from_utf8_lossy(input_bytes).into_owned();
        let line = format!("\r\x1b[K> {input}");
        session.write(line.as_bytes());
    }

    async fn render_command_output(&self, session: &Arc<Session>) {
        let output = session.ui().command_output.clone();
        let mut out = String::new();
        out.push_str(CLEAR);
        out.push_str(&output);
        out.push_str("\r\n");
        session.write(out.as_bytes());
    }

    async fn render_help(&self, session: &Arc<Session>) {
        let (lang, scroll) = {
            let ui = session.ui();
            (ui.help_lang, ui.help_scroll_pos)
        };
        let text = match lang {
            HelpLang::English => HELP_EN,
            HelpLang::Chinese => HELP_ZH,
        };
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let scroll = scroll.min(total.saturating_sub(1));
        // `G` sets help_scroll_pos to usize::MAX as a "jump to bottom"
        // sentinel; only the renderer knows `total`, so persist the clamp
        // back here or `k` would decrement from usize::MAX for a very long
        // time before producing a visible change.
        session.ui().help_scroll_pos = scroll;

        let mut out = String::new();
        out.push_str(CLEAR);
        for line in &lines[scroll..] {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str(&format!(
            "({}/{total}) j/k:scroll g/G:top/bottom e/z:lang q:close\r\n",
            scroll + 1
        ));
        session.write(out.as_bytes());
    }

    async fn clear_screen(&self, session: &Arc<Session>) {
        session.write(CLEAR.as_bytes());
    }
}

fn status_line(mode: Mode, position: usize, total: usize) -> String {
    let label = match mode {
        Mode::Insert => "-- INSERT --".to_string(),
        Mode::Normal => format!("-- NORMAL -- ({position}/{total}) i: insert, : command, ?: help"),
        Mode::Command => "-- COMMAND --".to_string(),
        Mode::Help => "-- HELP --".to_string(),
    };
    format!("{label}\r\n")
}

fn truncate_line(line: &str, width: usize) -> String {
    if width == 0 {
        return line.to_string();
    }
    tnt_core::utf8::truncate_to_width(line, width).to_string()
}

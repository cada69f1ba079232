/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: template.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 14:26:40
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-18 11:09:32
 */

use log::debug;
use minijinja::{Environment, UndefinedBehavior, Value};

/// Render a user-supplied template. Undefined variables are lenient (they
/// print empty and iterate as nothing), so tenant templates keep working
/// even when a branch does not supply every variable.
pub fn render(template: &str, params: Value) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    let rendered = env
        .render_str(template, params)
        .map_err(|e| anyhow::anyhow!("template render failed: {}", e))?;
    Ok(to_crlf(&rendered))
}

/// Soft-failure wrapper: a malformed template must never abort message
/// flow, so errors collapse to an empty string.
pub fn render_or_empty(template: &str, params: Value) -> String {
    match render(template, params) {
        Ok(content) => content,
        Err(e) => {
            debug!("{}", e);
            String::new()
        }
    }
}

/// Re-line-end rendered output to CRLF for the wire.
fn to_crlf(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\n', "\r\n")
}

/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: consts.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 10:12:44
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-09 18:40:21
 */

// Canonical SMTP rejection texts. The ingress handler replies with one of
// these verbatim; anything else is an implicit "250 OK".
pub const SMTP_STATUS_CLOSED_ML: &str = "550 ML is closed";
pub const SMTP_STATUS_NO_SUCH_ML: &str = "550 No such ML";
pub const SMTP_STATUS_NO_SUCH_TENANT: &str = "550 No such tenant";
pub const SMTP_STATUS_NOT_MEMBER: &str = "550 Not member";
pub const SMTP_STATUS_NO_ML_SPECIFIED: &str = "550 No ML specified";
pub const SMTP_STATUS_CANT_CROSS_POST: &str = "550 Can't cross-post a message";

// Local-part suffix of every bounce address: posts go out with envelope
// sender <ml_name>-error@<domain> so delivery failures come back to us.
pub const ERROR_SUFFIX: &str = "-error";

// Local part of the reporter's envelope sender, independent of tenant.
pub const REPORT_ERROR_RETURN: &str = "amane-error";

// Sentinel actors recorded in operation logs.
pub const ACTOR_CLI: &str = "CLI";
pub const ACTOR_REVIEWER: &str = "reviewer";

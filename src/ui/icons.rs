//! Shared UI icons.

use console::Emoji;

// Verdicts
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");

// Loop activity
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static FIX: Emoji<'_, '_> = Emoji("🔧 ", "[F]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
pub static ESCALATE: Emoji<'_, '_> = Emoji("🚨 ", "[ESC]");
pub static STATS: Emoji<'_, '_> = Emoji("📊 ", "[STATS]");
pub static FILE: Emoji<'_, '_> = Emoji("📄 ", "");

pub struct Icons;

impl Icons {
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const DATABASE: &str = "🗄️";
    pub const NEW: &str = "✨";
    pub const COLUMN: &str = "➕";
    pub const DEL: &str = "🗑️";
}

pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# CHANRELAY CONFIGURATION
# =============================================================================
# Polls channels for new messages, relays them to one destination chat and
# keeps a log of everything relayed.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/chanrelay/config.yml
#   3. /etc/chanrelay/config.yml
#
# Any value may reference an environment variable as $env{...} with the
# variable name between the braces.

# =============================================================================
# SOURCES
# =============================================================================
# Channels to poll, visited in this order on every run. Public handles may be
# written with or without '@'; private channels use their numeric id.

sources:
  - durov
  - "@telegram"

# =============================================================================
# SOURCE BRIDGE
# =============================================================================
# HTTP bridge that serves channel history.

source:
  bridge_url: http://127.0.0.1:8081
  # Most recent messages fetched per channel per run
  page_size: 100
  timeout: 30s
  # Dialogs listed on connect to warm the bridge's peer cache (0 disables)
  warm_up_dialogs: 200

# =============================================================================
# SINK (optional)
# =============================================================================
# Chat that new messages are relayed to through the Bot API. Remove this
# section to only archive messages.

sink:
  bot_token: $env{CHANRELAY_BOT_TOKEN}
  chat_id: "@my_warehouse_channel"
  api_url: https://api.telegram.org
  timeout: 30s
  disable_link_preview: false

relay:
  # Resends after a "retry after" answer, per rendering
  max_retries: 3
  delay_between_messages: 1s

# =============================================================================
# NETWORK (optional)
# =============================================================================
# network:
#   proxy: socks5://127.0.0.1:1080

storage:
  path: ~/.local/share/chanrelay/relay.duckdb

web:
  listen: 127.0.0.1:8000
"#
    .to_string()
}

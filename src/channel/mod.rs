/*
┌──────────────┐  AdapterSink   ┌──────────────────┐  attach()  ┌────────────────┐
│ ChannelAdapter│ ─────────────▶ │   ChatBot pump   │ ─────────▶ │  ReceiveNode   │
│ (console, …)  │ ◀───────────── │ auth, middleware │            │ master? handoff│
└──────────────┘   bot.send()   └──────────────────┘            └───────┬────────┘
        ▲                                                  pending      │     idle
        │                                   ┌───────────────────────────┴──────────┐
        │                                   ▼                                      ▼
        │                       EventRelayBus "node:<id>"                  output 0 wires
        │                                   │                                      │
        │                                   ▼                                      ▼
        │                      follow-up output of the node             request / send nodes
        │                      that asked (request: 1, send: 0)                    │
        └──────────────────────────────────────────────────────────────────────────┘
*/
pub mod console;

pub use console::ConsoleAdapter;

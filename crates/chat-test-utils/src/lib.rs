// chat-test-utils: a mock WebSocket client for driving a gateway under test,
// mirroring this workspace's existing mock-WS-client pattern for the
// forwarding suite.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;

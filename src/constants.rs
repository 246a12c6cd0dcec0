//! Constants for the runtime proxy.
//!
//! All limits, timeouts, and header keys are defined here to ensure
//! consistency and prevent magic numbers throughout the codebase.

use std::ops::Range;
use std::time::Duration;

// =============================================================================
// Pool Thresholds
// =============================================================================

/// Seconds an idle runtime may linger before the sweeper destroys it.
pub const IDLE_THRESHOLD_SECS: i64 = 300;

/// Maximum entries kept in the destroyed-runtime ring (oldest overwritten).
pub const DESTROYED_RING_CAPACITY: usize = 100;

// =============================================================================
// Image Store Thresholds
// =============================================================================

/// Seconds a session image may go unused before eviction.
pub const IMAGE_OUTDATED_SECS: i64 = 3600;

/// Seconds added to a session image's active time on every lookup.
/// Keeps the sweeper from racing a scheduling decision that just read it.
pub const IMAGE_GET_SAFETY_SECS: i64 = 5;

// =============================================================================
// Sweeper Cadence
// =============================================================================

/// Interval between sweeps of the runtime pool and the image store.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Readiness Probing
// =============================================================================

/// Hard deadline for a launched container to answer its probe with 200.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between readiness probe attempts.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Extra wait after the first 200 before the instance is handed out.
pub const READINESS_WARMUP_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Idle Marking
// =============================================================================

/// Delay before `free_runtime` flips a pool entry to idle. Absorbs
/// close-coupled follow-up requests from the same client.
pub const FREE_RUNTIME_DELAY: Duration = Duration::from_secs(2);

/// Delay applied by the response handler before it calls `free_runtime`.
pub const RESPONSE_IDLE_DELAY: Duration = Duration::from_secs(5);

// =============================================================================
// Port Allocation
// =============================================================================

/// Host ports are drawn uniformly at random from this range.
pub const HOST_PORT_RANGE: Range<u16> = 30000..65530;

// =============================================================================
// Transport Timeouts
// =============================================================================

/// Dial timeout for proxied upstream connections.
pub const PROXY_DIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle connection timeout for the proxy connection pool.
pub const PROXY_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period for in-flight requests during shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

// =============================================================================
// Command History
// =============================================================================

/// Maximum entries in the command-history ring (FIFO).
pub const COMMAND_HISTORY_CAPACITY: usize = 200;

// =============================================================================
// Tunneling Headers
// =============================================================================

/// Request header carrying the base64(JSON) rebuild plan through the
/// upstream round-trip.
pub const REBUILD_HEADER: &str = "registry-factory";

/// Request header carrying the pool key for response-side idle marking.
pub const INSTANCE_KEY_HEADER: &str = "instance-key";

// =============================================================================
// Management API
// =============================================================================

/// Path prefix served locally instead of being proxied.
pub const MANAGEMENT_API_PREFIX: &str = "/api/v1";

// =============================================================================
// Defaults
// =============================================================================

/// Image tag assumed when a policy leaves the tag empty.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

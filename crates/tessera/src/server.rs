//! The server facade
//!
//! A [`Server`] is the single entry point for one owner. It selects a backend
//! family when constructed, then hands out schedulers bound to it. It routes
//! work but never executes any itself.

use crate::backend::{select, BackendKind, ServerBackend};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::host::Host;
use crate::scheduler::{AsyncScheduler, EntityScheduler, GlobalScheduler, RegionScheduler};
use crate::task::Completion;
use crate::world::{
    Block, Chunk, EntityRef, Location, Owner, OwnershipTarget, TeleportCause, World,
};
use std::fmt;
use std::sync::Arc;

/// Scheduling entry point for one owner
pub struct Server {
    owner: Owner,
    backend: Arc<dyn ServerBackend>,
    global: GlobalScheduler,
    async_scheduler: AsyncScheduler,
}

impl Server {
    /// Bind `owner` to `host` with the default configuration
    pub fn new(host: &dyn Host, owner: Owner) -> Result<Self, SchedulerError> {
        Self::with_config(host, owner, SchedulerConfig::default())
    }

    /// Bind `owner` to `host`.
    ///
    /// Fails if the configuration is invalid or no backend family can be
    /// resolved on this host.
    pub fn with_config(
        host: &dyn Host,
        owner: Owner,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let backend = select::select(host, &owner, &config)?;
        let global = GlobalScheduler::new(owner.clone(), Arc::clone(&backend));
        let async_scheduler = AsyncScheduler::new(owner.clone(), backend.async_binding());
        Ok(Self {
            owner,
            backend,
            global,
            async_scheduler,
        })
    }

    /// Owner all tasks are scheduled for
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// The backend family chosen at construction
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The global scheduler
    pub fn global(&self) -> &GlobalScheduler {
        &self.global
    }

    /// The off-main scheduler
    pub fn async_scheduler(&self) -> &AsyncScheduler {
        &self.async_scheduler
    }

    /// A scheduler following `entity`
    pub fn entity(&self, entity: &EntityRef) -> EntityScheduler {
        EntityScheduler::new(
            self.owner.clone(),
            Arc::clone(entity),
            self.backend.entity(Arc::clone(entity)),
        )
    }

    /// A scheduler for the region owning chunk `(chunk_x, chunk_z)` of `world`
    pub fn region(&self, world: &World, chunk_x: i32, chunk_z: i32) -> RegionScheduler {
        self.region_of_chunk(&Chunk::new(world.clone(), chunk_x, chunk_z))
    }

    /// A scheduler for the region owning `location`
    pub fn region_at(&self, location: &Location) -> RegionScheduler {
        self.region_of_chunk(&location.chunk())
    }

    /// A scheduler for the region owning `block`
    pub fn region_of_block(&self, block: &Block) -> RegionScheduler {
        self.region_of_chunk(&block.chunk())
    }

    /// A scheduler for the region owning `chunk`
    pub fn region_of_chunk(&self, chunk: &Chunk) -> RegionScheduler {
        RegionScheduler::new(
            self.owner.clone(),
            chunk.clone(),
            self.backend.region(chunk.clone()),
        )
    }

    /// Whether the calling thread ticks the region containing `location`
    pub fn is_owned_by_current_region(&self, location: &Location) -> bool {
        self.is_owned_by_current_region_within(location, 0)
    }

    /// Whether the calling thread ticks every chunk within `radius` chunks of
    /// `location`
    pub fn is_owned_by_current_region_within(&self, location: &Location, radius: u32) -> bool {
        self.backend
            .is_owned_by_current_region(OwnershipTarget::Location { location, radius })
    }

    /// Whether the calling thread ticks the region containing `block`
    pub fn is_block_owned_by_current_region(&self, block: &Block) -> bool {
        let chunk = block.chunk();
        self.is_chunk_owned_by_current_region(&chunk.world, chunk.x, chunk.z)
    }

    /// Whether the calling thread ticks chunk `(chunk_x, chunk_z)` of `world`
    pub fn is_chunk_owned_by_current_region(
        &self,
        world: &World,
        chunk_x: i32,
        chunk_z: i32,
    ) -> bool {
        self.is_chunk_owned_by_current_region_within(world, chunk_x, chunk_z, 0)
    }

    /// Whether the calling thread ticks every chunk within `radius` chunks of
    /// `(chunk_x, chunk_z)`
    pub fn is_chunk_owned_by_current_region_within(
        &self,
        world: &World,
        chunk_x: i32,
        chunk_z: i32,
        radius: u32,
    ) -> bool {
        self.backend.is_owned_by_current_region(OwnershipTarget::Chunk {
            world,
            x: chunk_x,
            z: chunk_z,
            radius,
        })
    }

    /// Whether the calling thread ticks the region `entity` lives in
    pub fn is_entity_owned_by_current_region(&self, entity: &EntityRef) -> bool {
        self.backend
            .is_owned_by_current_region(OwnershipTarget::Entity(entity.as_ref()))
    }

    /// Cancel the owner's global and async tasks.
    ///
    /// Region and entity tasks are not affected on region-threaded hosts,
    /// which cannot enumerate them by owner. Single-thread hosts cancel every
    /// task of the owner.
    pub fn cancel_tasks(&self) {
        self.backend.cancel_tasks();
    }

    /// Teleport `entity` to `location` with cause [`TeleportCause::Plugin`]
    pub fn teleport_async(&self, entity: &EntityRef, location: &Location) -> Completion<bool> {
        self.teleport_async_with_cause(entity, location, TeleportCause::default())
    }

    /// Teleport `entity` to `location`.
    ///
    /// Resolves `true` on success. Any failure, including a panicking
    /// fallback teleport or a removed entity, resolves `false`.
    pub fn teleport_async_with_cause(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool> {
        self.backend.teleport_async(entity, location, cause)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("owner", &self.owner)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendPreference;
    use crate::host::{ExecutionState, Retired};
    use crate::test_support::{ManualRegionHost, ManualTickHost, StubHost, TestEntity};
    use crate::TaskFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tick_server() -> (Arc<ManualTickHost>, Server) {
        let host = StubHost::tick();
        let tick = host.tick.clone().unwrap();
        let server = Server::new(&host, Owner::new("test")).unwrap();
        (tick, server)
    }

    fn region_server() -> (Arc<ManualRegionHost>, Server) {
        let host = StubHost::regionized();
        let regions = host.regionized.clone().unwrap();
        let server = Server::new(&host, Owner::new("test")).unwrap();
        (regions, server)
    }

    fn counter() -> (Arc<AtomicUsize>, Retired) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&count);
        let retired = Retired::new(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        (count, retired)
    }

    #[test]
    fn test_one_shot_global_task() {
        for (advance, server) in [
            {
                let (host, server) = tick_server();
                (Box::new(move || host.advance()) as Box<dyn Fn()>, server)
            },
            {
                let (host, server) = region_server();
                (Box::new(move || host.advance()) as Box<dyn Fn()>, server)
            },
        ] {
            let task = server.global().run(|_| 42);
            assert!(!task.is_repeating_task());
            assert!(!task.is_done());
            advance();

            let resolved = task.as_future().try_get().unwrap().unwrap();
            assert_eq!(resolved.result(), Some(42));
            assert_eq!(task.execution_state(), ExecutionState::Finished);
        }
    }

    #[test]
    fn test_periodic_task_cancels_itself_after_three_runs() {
        let (host, server) = region_server();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = server.global().run_at_fixed_rate(
            move |task| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    task.cancel();
                }
                n
            },
            0,
            5,
        );

        host.advance();
        assert!(task.is_done());
        assert_eq!(task.result(), Some(1));
        for _ in 0..30 {
            host.advance();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(task.result(), Some(3));
        assert!(task.is_cancelled());
        assert!(task.is_repeating_task());
    }

    #[test]
    fn test_entity_removed_before_call() {
        for server in [tick_server().1, region_server().1] {
            let entity = TestEntity::spawn(9);
            entity.remove();
            let entity: EntityRef = entity;
            let (retirements, retired) = counter();

            let task = server.entity(&entity).run(|_| (), Some(retired));
            assert!(task.is_none());
            assert_eq!(retirements.load(Ordering::SeqCst), 1);

            let accepted = server.entity(&entity).execute(|| {}, None, 1);
            assert!(!accepted);
        }
    }

    #[test]
    fn test_entity_removed_before_run_on_tick_host() {
        let (host, server) = tick_server();
        let entity = TestEntity::spawn(10);
        let entity_ref: EntityRef = entity.clone();
        let (retirements, retired) = counter();

        let task = server
            .entity(&entity_ref)
            .run_delayed(|_| 1, Some(retired), 2)
            .unwrap();
        entity.remove();
        host.advance();
        host.advance();

        assert_eq!(retirements.load(Ordering::SeqCst), 1);
        assert!(!task.is_done());
        assert_eq!(task.result(), None);
    }

    #[test]
    fn test_region_resolution_agrees() {
        let (_host, server) = region_server();
        let world = World::new("overworld");
        let location = Location::new(world.clone(), 37.5, 70.0, -20.2);

        let by_location = server.region_at(&location);
        let by_coords = server.region(
            &world,
            location.block_x() >> crate::world::CHUNK_SHIFT,
            location.block_z() >> crate::world::CHUNK_SHIFT,
        );
        let by_block = server.region_of_block(&location.block());
        assert_eq!(by_location, by_coords);
        assert_eq!(by_location, by_block);
        assert_eq!(by_location.key(), &Chunk::new(world, 2, -2));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (host, server) = tick_server();
        let task = server.global().run_delayed(|_| (), 3);
        task.cancel();
        task.cancel();
        for _ in 0..4 {
            host.advance();
        }
        assert!(task.is_cancelled());
        assert!(!task.is_done());
        assert_eq!(task.run_count(), 0);
    }

    #[test]
    fn test_periodic_panic_keeps_schedule_and_waits_for_success() {
        let (host, server) = tick_server();
        let task = server.global().run_at_fixed_rate(
            |task| {
                if task.run_count() == 0 {
                    panic!("first run fails");
                }
                task.run_count()
            },
            1,
            1,
        );
        host.advance();
        assert_eq!(task.run_count(), 1);
        assert!(task.as_future().try_get().is_none());

        host.advance();
        let resolved = task.as_future().try_get().unwrap().unwrap();
        assert_eq!(resolved.result(), Some(1));

        host.advance();
        assert_eq!(task.result(), Some(2));
        task.cancel();
    }

    #[test]
    fn test_panicking_one_shot_fails_future() {
        let (host, server) = tick_server();
        let task = server.global().run(|_| -> u32 { panic!("one shot fails") });
        host.advance();
        let failure = task.as_future().try_get().unwrap().unwrap_err();
        assert_eq!(failure, TaskFailure::Panicked("one shot fails".to_string()));
    }

    #[test]
    fn test_async_on_tick_host_uses_async_lane() {
        let (host, server) = tick_server();
        let task = server
            .async_scheduler()
            .run_delayed(|_| "done", Duration::from_millis(100));
        let submitted = host.submissions();
        assert_eq!(submitted.last().unwrap().0, crate::host::Lane::Async);
        assert_eq!(submitted.last().unwrap().1, crate::host::Schedule::Delayed(2));
        host.advance();
        host.advance();
        assert_eq!(task.result(), Some("done"));
    }

    #[test]
    fn test_cancel_tasks_routes_per_family() {
        let (_tick, server) = tick_server();
        let global = server.global().run_delayed(|_| (), 5);
        let region = server
            .region(&World::new("w"), 0, 0)
            .run_delayed(|_| (), 5);
        server.cancel_tasks();
        assert!(global.is_cancelled());
        assert!(region.is_cancelled());

        let (regions, server) = region_server();
        server.cancel_tasks();
        assert_eq!(regions.cancellations(), vec!["global", "async"]);
    }

    #[test]
    fn test_ownership_queries_delegate() {
        let (regions, server) = region_server();
        let world = World::new("w");
        let location = Location::new(world.clone(), 1.0, 2.0, 3.0);
        regions.set_current(Some(Chunk::new(world.clone(), 0, 0)));

        assert!(server.is_owned_by_current_region(&location));
        assert!(server.is_block_owned_by_current_region(&location.block()));
        assert!(server.is_chunk_owned_by_current_region(&world, 0, 0));
        assert!(!server.is_chunk_owned_by_current_region(&world, 1, 0));
        assert!(!server.is_owned_by_current_region_within(&location, 1));

        let entity: EntityRef = TestEntity::spawn_at(11, location.clone());
        assert!(server.is_entity_owned_by_current_region(&entity));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let host = StubHost::tick();
        let config = SchedulerConfig {
            backend: BackendPreference::Auto,
            tick_millis: 0,
        };
        let err = Server::with_config(&host, Owner::new("test"), config).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn test_teleport_default_cause() {
        let (regions, server) = region_server();
        let entity: EntityRef = TestEntity::spawn(12);
        let destination = Location::new(World::new("w"), 5.0, 5.0, 5.0);
        let moved = server.teleport_async(&entity, &destination);
        assert_eq!(moved.try_get(), Some(true));
        assert_eq!(regions.teleport_causes(), vec![TeleportCause::Plugin]);
    }
}

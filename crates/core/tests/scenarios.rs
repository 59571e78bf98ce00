use std::{cell::RefCell, rc::Rc};

use backdrop_core::{
    gpu, shader::cache_key, AlwaysVisible, DeviceProfile, DitherEffect, DitherProps, Effect,
    FrameOutcome, FxConfig, FxServices, HeadlessBackend, LoopState, ManualClock, ManualScheduler,
    MetaballsEffect, MetaballsProps, NetworkEffect, NetworkProps, QualityTier, RenderLoop,
    ShaderVariant, StaticProbe,
};

struct Page {
    gpu: Rc<RefCell<HeadlessBackend>>,
    services: FxServices,
}

impl Page {
    fn new() -> Self {
        let (gpu, shared) = gpu::shared(HeadlessBackend::new());
        let services = FxServices::new(FxConfig::default(), shared, Rc::new(ManualClock::new()));
        Self { gpu, services }
    }

    fn mount<E: Effect>(&self, effect: E) -> (RenderLoop<E>, Rc<RefCell<ManualScheduler>>) {
        let scheduler = Rc::new(RefCell::new(ManualScheduler::new()));
        let lp = RenderLoop::new(
            effect,
            self.services.clone(),
            Box::new(scheduler.clone()),
            Box::new(AlwaysVisible),
        );
        (lp, scheduler)
    }
}

fn drive<E: Effect>(lp: &mut RenderLoop<E>, scheduler: &RefCell<ManualScheduler>, frames: usize) {
    for i in 0..frames {
        if !scheduler.borrow_mut().fire() {
            break;
        }
        lp.on_frame(i as f64 * 16.7);
    }
}

#[test]
fn low_end_phone_gets_low_tier_caps() {
    let profile = DeviceProfile::new(2, None, true);
    assert_eq!(profile.score(), 1);
    assert_eq!(profile.tier(), QualityTier::Low);

    let page = Page::new();
    let probe = StaticProbe(profile);

    let (mut balls, _) = page.mount(MetaballsEffect::new(MetaballsProps {
        ball_count: 50,
        ..MetaballsProps::default()
    }));
    let (mut network, _) = page.mount(NetworkEffect::new(NetworkProps {
        particle_count: 500,
        ..NetworkProps::default()
    }));
    assert_eq!(balls.start(&probe).unwrap(), LoopState::Ready);
    assert_eq!(network.start(&probe).unwrap(), LoopState::Ready);

    let settings = QualityTier::Low.settings();
    assert_eq!(settings.update_interval, 3);
    assert!(settings.max_balls <= 5 && settings.max_particles <= 5);
    assert_eq!(balls.effect().ball_count(), settings.max_balls);
    assert_eq!(network.effect().particle_count(), settings.max_particles);
}

#[test]
fn desktop_gets_largest_shader_variant() {
    let profile = DeviceProfile::new(8, Some(16.0), false);
    assert_eq!(profile.score(), 6);

    let page = Page::new();
    let (mut lp, scheduler) = page.mount(DitherEffect::new(DitherProps::default()));
    lp.start(&StaticProbe(profile)).unwrap();
    assert_eq!(lp.tier(), Some(QualityTier::High));
    assert_eq!(lp.tier().unwrap().settings().update_interval, 1);

    let key = cache_key(ShaderVariant::Dither, &profile, QualityTier::High);
    let cache = page.services.cache.borrow();
    let source = cache.source(&key).expect("dither program cached");
    assert!(source.fragment.contains("const int DITHER_SIZE = 4;"));
    assert_eq!(source.fragment.matches("// octave").count(), 3);
    drop(cache);

    drive(&mut lp, &scheduler, 10);
    assert_eq!(lp.frame().draws, 10);
}

#[test]
fn unmounting_one_effect_leaves_the_others_running() {
    let page = Page::new();
    let probe = StaticProbe(DeviceProfile::new(8, Some(16.0), false));

    let (mut background, bg_scheduler) = page.mount(DitherEffect::new(DitherProps::default()));
    background.start(&probe).unwrap();
    drive(&mut background, &bg_scheduler, 3);
    let before = page.services.pool_stats().total_active;

    let (mut balls, scheduler) = page.mount(MetaballsEffect::new(MetaballsProps::default()));
    balls.start(&probe).unwrap();
    drive(&mut balls, &scheduler, 20);
    assert_eq!(balls.state(), LoopState::Running);
    assert!(page.services.pool_stats().total_active > before);

    balls.dispose();
    assert_eq!(page.services.pool_stats().total_active, before);
    assert!(scheduler.borrow().pending().is_none());

    let frames = balls.frame().frame_counter;
    let draws = page.gpu.borrow().draw_calls();
    assert_eq!(balls.on_frame(10_000.0), FrameOutcome::Inactive);
    assert_eq!(balls.frame().frame_counter, frames);
    assert_eq!(page.gpu.borrow().draw_calls(), draws);

    drive(&mut background, &bg_scheduler, 3);
    assert_eq!(background.state(), LoopState::Running);
    assert_eq!(page.gpu.borrow().draw_calls(), draws + 3);
    assert!(page.services.health_status().healthy);
}

#[test]
fn dropping_every_loop_and_the_services_frees_the_gpu() {
    let page = Page::new();
    let probe = StaticProbe(DeviceProfile::new(4, Some(8.0), false));
    {
        let (mut a, sa) = page.mount(NetworkEffect::new(NetworkProps::default()));
        let (mut b, sb) = page.mount(MetaballsEffect::new(MetaballsProps::default()));
        a.start(&probe).unwrap();
        b.start(&probe).unwrap();
        drive(&mut a, &sa, 8);
        drive(&mut b, &sb, 8);
        assert_eq!(page.gpu.borrow().live_programs(), 2);
    }
    assert_eq!(page.services.pool_stats().total_active, 0);
    assert_eq!(page.services.cache_stats().entries, 2);

    page.services.cache.borrow_mut().clear_cache();
    assert_eq!(page.gpu.borrow().live_programs(), 0);
}

use mindctrl_protocol::Output;
use mindctrl_runtime::Registry;

pub(super) fn register(registry: &mut Registry) {
	registry.register("ping", |_| Some(()), |()| async { anyhow::Ok(Output::success()) });
}

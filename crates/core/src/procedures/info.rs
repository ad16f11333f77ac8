use std::sync::Arc;

use mindctrl_runtime::Registry;

use super::{bind, reply};
use crate::host::InfoHost;

pub(super) fn register<H: InfoHost + 'static>(registry: &mut Registry, host: &Arc<H>) {
	registry
		.register(
			"info.get_platform",
			|_| Some(()),
			bind(host, |host, ()| async move { reply(host.platform().await) }),
		)
		.register(
			"info.get_browser",
			|_| Some(()),
			bind(host, |host, ()| async move { reply(host.browser().await) }),
		);
}

//! Browser-only globals for headless execution
//!
//! Code Editor scripts talk to a map widget, build dashboards out of `ui`
//! widgets and `print` to the console panel. None of that exists outside the
//! browser, so this module supplies stand-ins:
//!
//! - `print`: accepts anything and does nothing. Modules get this one; the
//!   sandbox gives the caller script a logging print built with
//!   [`ShimRegistry::logging_print`].
//! - `Map`: every layer, view and listener method answers with an inert value
//!   (an empty layer list, the identity viewport, a listener id).
//! - `ui`: every widget factory returns a widget whose methods are no-ops or
//!   trivial accessors (`setX(v)` stores, `getX()` reads back).
//!
//! The same three objects are shared by every module and the caller script of
//! one context, so a script cannot tell whether it is the entry point.

use boa_engine::object::JsObject;
use boa_engine::{Context, JsNativeError, JsResult, JsValue, Source, js_string};

/// Browser shims plus the script-side helpers the sandbox needs
#[derive(Debug, Clone)]
pub struct ShimRegistry {
    print: JsValue,
    map: JsValue,
    ui: JsValue,
    helpers: JsObject,
}

impl ShimRegistry {
    /// Evaluate the shim prelude inside `context`
    pub fn install(context: &mut Context) -> JsResult<Self> {
        let prelude = context.eval(Source::from_bytes(create_shim_prelude()))?;
        let helpers = prelude.as_object().ok_or_else(|| {
            JsNativeError::typ().with_message("shim prelude did not produce an object")
        })?;
        let helpers: JsObject = helpers.clone();

        let print = helpers.get(js_string!("print"), context)?;
        let map = helpers.get(js_string!("Map"), context)?;
        let ui = helpers.get(js_string!("ui"), context)?;

        Ok(Self {
            print,
            map,
            ui,
            helpers,
        })
    }

    /// The quiet `print` shared by modules
    pub fn print(&self) -> JsValue {
        self.print.clone()
    }

    /// The `Map` widget shim
    pub fn map(&self) -> JsValue {
        self.map.clone()
    }

    /// The `ui` factory shim
    pub fn ui(&self) -> JsValue {
        self.ui.clone()
    }

    /// Build a `print` that formats its arguments into one line and hands the
    /// line to `sink`. Objects are serialised as JSON.
    pub fn logging_print(&self, sink: JsValue, context: &mut Context) -> JsResult<JsValue> {
        self.call_helper("makePrint", &[sink], context)
    }

    /// Build the `Export` namespace around the native `submit` and `start`
    /// callbacks.
    ///
    /// `submit(category, destination, configJson)` returns a task id or null,
    /// `start(id)` starts a submitted task.
    pub fn export_namespace(
        &self,
        submit: JsValue,
        start: JsValue,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        self.call_helper("makeExport", &[submit, start], context)
    }

    /// Whichever of `module.exports` and `exports` a module populated,
    /// `module.exports` preferred
    pub fn pick_exports(
        &self,
        module: &JsValue,
        exports: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        self.call_helper("pickExports", &[module.clone(), exports.clone()], context)
    }

    fn call_helper(&self, name: &str, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
        let helper = self.helpers.get(boa_engine::JsString::from(name), context)?;
        let function = helper.as_callable().ok_or_else(|| {
            let message = format!("shim helper {name} is not callable");
            JsNativeError::typ().with_message(message)
        })?;
        function.call(&JsValue::undefined(), args, context)
    }
}

/// Script prelude installing the browser shims
pub fn create_shim_prelude() -> &'static str {
    r#"
(function () {
    'use strict';

    var nextListener = 0;

    function listen() {
        nextListener += 1;
        return 'listener-' + nextListener;
    }

    function lowerFirst(name) {
        return name.charAt(0).toLowerCase() + name.slice(1);
    }

    function list(items) {
        var self = {
            length: function () { return items.length; },
            size: function () { return items.length; },
            get: function (index) { return items[index]; },
            set: function (index, item) { items[index] = item; return self; },
            add: function (item) { items.push(item); return self; },
            insert: function (index, item) { items.splice(index, 0, item); return self; },
            remove: function (item) {
                var index = items.indexOf(item);
                if (index < 0) {
                    return false;
                }
                items.splice(index, 1);
                return true;
            },
            reset: function (replacement) {
                items.length = 0;
                if (replacement) {
                    for (var i = 0; i < replacement.length; i++) {
                        items.push(replacement[i]);
                    }
                }
                return self;
            },
            forEach: function (callback) { items.forEach(callback); },
            map: function (callback) { return items.map(callback); },
            toJSON: function () { return items; }
        };
        return self;
    }

    function widget(kind, state, children, overrides) {
        var self;
        var target = function () { return self; };
        self = new Proxy(target, {
            get: function (t, prop) {
                if (typeof prop === 'symbol' || prop === 'prototype') {
                    return t[prop];
                }
                if (overrides && Object.prototype.hasOwnProperty.call(overrides, prop)) {
                    return overrides[prop];
                }
                if (prop === 'then') {
                    return undefined;
                }
                if (prop === 'toJSON') {
                    return function () { return { widget: kind }; };
                }
                if (prop === 'widgets') {
                    return function () { return list(children); };
                }
                if (prop === 'add') {
                    return function (child) { children.push(child); return self; };
                }
                if (prop === 'clear') {
                    return function () { children.length = 0; return self; };
                }
                if (prop === 'remove') {
                    return function (child) { return list(children).remove(child); };
                }
                if (prop === 'insert') {
                    return function (index, child) { children.splice(index, 0, child); return self; };
                }
                if (prop === 'style') {
                    return function () {
                        var styles = {};
                        return {
                            get: function (key) { return styles[key]; },
                            set: function (key, value) {
                                if (typeof key === 'object' && key !== null) {
                                    for (var k in key) {
                                        styles[k] = key[k];
                                    }
                                } else {
                                    styles[key] = value;
                                }
                                return this;
                            }
                        };
                    };
                }
                if (prop === 'unlisten') {
                    return function () {};
                }
                if (/^on[A-Z]/.test(prop)) {
                    return function () { return listen(); };
                }
                if (/^get[A-Z]/.test(prop)) {
                    var getKey = lowerFirst(prop.slice(3));
                    return function () { return state[getKey]; };
                }
                if (/^set[A-Z]/.test(prop)) {
                    var setKey = lowerFirst(prop.slice(3));
                    return function (value) { state[setKey] = value; return self; };
                }
                return function () { return self; };
            },
            apply: function () { return self; },
            construct: function () { return self; }
        });
        return self;
    }

    function create(path, args) {
        var state = {};
        var children = [];
        var first = args.length > 0 ? args[0] : undefined;
        if (Array.isArray(first)) {
            children = first.slice();
        } else if (first !== null && typeof first === 'object' && typeof first.toJSON !== 'function') {
            for (var key in first) {
                state[key] = first[key];
            }
            if (Array.isArray(state.widgets)) {
                children = state.widgets.slice();
            }
        } else if (first !== undefined) {
            state.value = first;
        }
        return widget(path, state, children);
    }

    function factory(path) {
        var target = function () {};
        return new Proxy(target, {
            get: function (t, prop) {
                if (typeof prop === 'symbol' || prop === 'prototype') {
                    return t[prop];
                }
                if (prop === 'then') {
                    return undefined;
                }
                if (prop === 'toJSON') {
                    return function () { return { factory: path }; };
                }
                return factory(path + '.' + prop);
            },
            apply: function (t, self, args) { return create(path, args); },
            construct: function (t, args) { return create(path, args); }
        });
    }

    function passThrough(callback) {
        return callback;
    }

    var ui = new Proxy({
        root: widget('root', {}, []),
        util: {
            debounce: passThrough,
            throttle: passThrough,
            rateLimit: passThrough,
            setTimeout: function () { return listen(); },
            setInterval: function () { return listen(); },
            clearTimeout: function () {},
            clear: function () {},
            getCurrentPosition: function () {}
        },
        url: {
            get: function (key, fallback) { return fallback; },
            set: function () {}
        }
    }, {
        get: function (t, prop) {
            if (typeof prop === 'symbol' || Object.prototype.hasOwnProperty.call(t, prop)) {
                return t[prop];
            }
            if (prop === 'then' || prop === 'toJSON') {
                return undefined;
            }
            return factory(prop);
        }
    });

    function inert() {}

    var Map = widget('Map', {}, [], {
        add: inert,
        addLayer: function (eeObject, visParams, name, shown, opacity) {
            return widget('Layer', {
                eeObject: eeObject,
                visParams: visParams || {},
                name: name,
                shown: shown === undefined ? true : shown,
                opacity: opacity === undefined ? 1 : opacity
            }, []);
        },
        layers: function () { return list([]); },
        remove: function () { return false; },
        clear: inert,
        centerObject: inert,
        setCenter: inert,
        setZoom: inert,
        setOptions: inert,
        setControlVisibility: inert,
        setLocked: inert,
        getCenter: function () { return { type: 'Point', coordinates: [0, 0] }; },
        getBounds: function () { return [-180, -90, 180, 90]; },
        getZoom: function () { return 0; },
        getScale: function () { return 1; },
        drawingTools: function () { return widget('DrawingTools', {}, []); }
    });

    function quietPrint() {}

    function format(value) {
        if (typeof value === 'string') {
            return value;
        }
        if (value === undefined) {
            return 'undefined';
        }
        if (value !== null && (typeof value === 'object' || typeof value === 'function')) {
            try {
                var json = JSON.stringify(value);
                if (json !== undefined) {
                    return json;
                }
            } catch (e) {
                // fall through to string conversion
            }
        }
        try {
            return String(value);
        } catch (e) {
            return Object.prototype.toString.call(value);
        }
    }

    function makePrint(sink) {
        return function print() {
            var parts = [];
            for (var i = 0; i < arguments.length; i++) {
                parts.push(format(arguments[i]));
            }
            sink(parts.join(' '));
        };
    }

    function serialize(value) {
        try {
            var json = JSON.stringify(value);
            return json === undefined ? 'null' : json;
        } catch (e) {
            return JSON.stringify({ unserializable: String(e) });
        }
    }

    function makeExport(submit, start) {
        function handle(id, category, destination) {
            var self = {
                id: id,
                category: category,
                destination: destination,
                start: function () {
                    if (id !== null) {
                        start(id);
                    }
                    return self;
                },
                status: function () {
                    return { id: id, state: id === null ? 'UNSUBMITTED' : 'SUBMITTED' };
                }
            };
            return self;
        }

        function entry(category, destination) {
            return function () {
                var args = Array.prototype.slice.call(arguments);
                var config;
                var first = args[0];
                if (args.length === 1 && first !== null && typeof first === 'object' &&
                        !Array.isArray(first) && typeof first.toJSON !== 'function') {
                    config = first;
                } else {
                    config = { arguments: args };
                }
                var id = submit(category, destination, serialize(config));
                return handle(id, category, destination);
            };
        }

        var namespace = {};
        ['image', 'table', 'video'].forEach(function (category) {
            namespace[category] = {};
            ['toAsset', 'toDrive', 'toCloudStorage'].forEach(function (destination) {
                namespace[category][destination] = entry(category, destination);
            });
        });
        return namespace;
    }

    function hasContent(value) {
        if (value === undefined || value === null) {
            return false;
        }
        if (typeof value === 'object') {
            return Object.keys(value).length > 0;
        }
        return true;
    }

    function pickExports(module, exports) {
        if (hasContent(module.exports)) {
            return module.exports;
        }
        return exports;
    }

    return {
        print: quietPrint,
        Map: Map,
        ui: ui,
        makePrint: makePrint,
        makeExport: makeExport,
        pickExports: pickExports
    };
})()
"#
}
